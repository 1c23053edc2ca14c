//! Command and event types exchanged between workers and the orchestrator.

use crate::capability::CapabilityId;
use chrono::{DateTime, Utc};
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One camera frame.
#[derive(Clone)]
pub struct Frame {
    /// RGB pixels, shared so frames can be forwarded without copying.
    pub image: Arc<RgbImage>,
    /// Monotonic frame counter within one camera session.
    pub sequence: u64,
    /// When the frame was read from the device.
    pub captured_at: Instant,
}

impl Frame {
    /// Wrap an image as frame `sequence`.
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image: Arc::new(image),
            sequence,
            captured_at: Instant::now(),
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.image.width())
            .field("height", &self.image.height())
            .finish()
    }
}

/// A synthesis voice offered by the speech engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    pub language: String,
    pub gender: String,
}

/// Presentation style of one response segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentStyle {
    Normal,
    Emphasis,
    Code,
}

/// Result of processing one user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlpResponse {
    /// Response category, e.g. `llm_response`, `info_response`, `fallback_info`.
    pub kind: String,
    /// Plain text suitable for speech synthesis.
    pub text_to_speak: String,
    /// Styled segments for the chat display.
    pub display: Vec<(SegmentStyle, String)>,
    pub original_input: String,
    pub timestamp: DateTime<Utc>,
    /// Emotion detected in the user input, if the backend does that.
    pub detected_emotion: Option<String>,
    /// Emotion the robot should express while answering.
    pub response_emotion: Option<String>,
    /// Backend-proposed action, opaque to the router.
    pub action: Option<serde_json::Value>,
}

/// A command addressed to one worker.
#[derive(Debug, Clone)]
pub enum Command {
    Speak { text: String },
    StopSpeaking,
    SetVoice { voice_id: String },
    SetRate { rate: i32 },
    SetVolume { volume: u8 },
    InitializeEngine,
    StartListening,
    StopListening,
    SetLanguage { code: String },
    InitializeMicrophone,
    AnalyzeText { text: String },
    ProcessInput { text: String },
    SetFilter { key: String },
    Stop,
    SaveImage { frame: Frame, path: PathBuf },
}

impl Command {
    /// Contract name of this command.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Speak { .. } => "speak",
            Self::StopSpeaking => "stop_speaking",
            Self::SetVoice { .. } => "set_voice",
            Self::SetRate { .. } => "set_rate",
            Self::SetVolume { .. } => "set_volume",
            Self::InitializeEngine => "initialize_engine",
            Self::StartListening => "start_listening",
            Self::StopListening => "stop_listening",
            Self::SetLanguage { .. } => "set_language",
            Self::InitializeMicrophone => "initialize_microphone",
            Self::AnalyzeText { .. } => "analyze_text",
            Self::ProcessInput { .. } => "process_input",
            Self::SetFilter { .. } => "set_filter",
            Self::Stop => "stop",
            Self::SaveImage { .. } => "save_image",
        }
    }
}

/// An event emitted by a worker.
#[derive(Debug, Clone)]
pub enum Event {
    SpeechStarted { text: String },
    SpeechWordBoundary { word: String, position: usize, length: usize },
    SpeechFinished { text: String },
    AvailableVoices { voices: Vec<Voice> },
    TextRecognized { text: String, confidence: f32 },
    ListeningStarted,
    ListeningStopped,
    VadStatus { speech_detected: bool },
    ListeningError { kind: String, message: String },
    EmotionDetected { emotion: String, confidence: f32 },
    ProcessingComplete(NlpResponse),
    FrameReady(Frame),
    ImageSaved { path: PathBuf },
    Error { message: String },
    Completed,
    Status { message: String, duration: Duration },
}

impl Event {
    /// Contract name of this event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SpeechStarted { .. } => "speech_started",
            Self::SpeechWordBoundary { .. } => "speech_word_boundary",
            Self::SpeechFinished { .. } => "speech_finished",
            Self::AvailableVoices { .. } => "available_voices",
            Self::TextRecognized { .. } => "text_recognized",
            Self::ListeningStarted => "listening_started",
            Self::ListeningStopped => "listening_stopped",
            Self::VadStatus { .. } => "vad_status",
            Self::ListeningError { .. } => "listening_error",
            Self::EmotionDetected { .. } => "emotion_detected",
            Self::ProcessingComplete(_) => "processing_complete",
            Self::FrameReady(_) => "frame_ready",
            Self::ImageSaved { .. } => "image_saved",
            Self::Error { .. } => "error",
            Self::Completed => "completed",
            Self::Status { .. } => "status",
        }
    }
}

/// A command together with the capability it is addressed to.
#[derive(Debug, Clone)]
pub struct CommandEnvelope {
    pub target: CapabilityId,
    pub command: Command,
}

impl CommandEnvelope {
    pub fn new(target: CapabilityId, command: Command) -> Self {
        Self { target, command }
    }
}

/// An event together with its source capability and emission time.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub source: CapabilityId,
    /// Which incarnation of the source worker emitted it; bumped on every rebuild.
    pub generation: u64,
    pub event: Event,
    pub timestamp: DateTime<Utc>,
}

impl EventEnvelope {
    pub fn new(source: CapabilityId, event: Event) -> Self {
        Self {
            source,
            generation: 0,
            event,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Contract name of the wrapped event.
    pub fn name(&self) -> &'static str {
        self.event.name()
    }
}
