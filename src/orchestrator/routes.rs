//! Handler names and the event-to-command routing table.

use crate::capability::CapabilityId;
use crate::worker::{Command, CommandEnvelope, Event, EventEnvelope};

/// Orchestrator event handlers, addressed by name from the wiring tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Handler {
    SpeechStarted,
    WordBoundary,
    SpeechFinished,
    AvailableVoices,
    TextRecognized,
    ListeningStarted,
    ListeningStopped,
    VadStatus,
    ListeningError,
    EmotionDetected,
    NlpResult,
    FrameReady,
    ImageSaved,
    WorkerError,
    Status,
    Completed,
}

impl Handler {
    pub const ALL: [Self; 16] = [
        Self::SpeechStarted,
        Self::WordBoundary,
        Self::SpeechFinished,
        Self::AvailableVoices,
        Self::TextRecognized,
        Self::ListeningStarted,
        Self::ListeningStopped,
        Self::VadStatus,
        Self::ListeningError,
        Self::EmotionDetected,
        Self::NlpResult,
        Self::FrameReady,
        Self::ImageSaved,
        Self::WorkerError,
        Self::Status,
        Self::Completed,
    ];

    /// Names passed to [`crate::supervisor::WorkerSupervisor::wire`].
    pub const NAMES: [&'static str; 16] = [
        "on_speech_started",
        "on_word_boundary",
        "on_speech_finished",
        "on_available_voices",
        "on_text_recognized",
        "on_listening_started",
        "on_listening_stopped",
        "on_vad_status",
        "on_listening_error",
        "on_emotion_detected",
        "on_nlp_result",
        "on_frame_ready",
        "on_image_saved",
        "on_worker_error",
        "on_status",
        "on_completed",
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SpeechStarted => "on_speech_started",
            Self::WordBoundary => "on_word_boundary",
            Self::SpeechFinished => "on_speech_finished",
            Self::AvailableVoices => "on_available_voices",
            Self::TextRecognized => "on_text_recognized",
            Self::ListeningStarted => "on_listening_started",
            Self::ListeningStopped => "on_listening_stopped",
            Self::VadStatus => "on_vad_status",
            Self::ListeningError => "on_listening_error",
            Self::EmotionDetected => "on_emotion_detected",
            Self::NlpResult => "on_nlp_result",
            Self::FrameReady => "on_frame_ready",
            Self::ImageSaved => "on_image_saved",
            Self::WorkerError => "on_worker_error",
            Self::Status => "on_status",
            Self::Completed => "on_completed",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|handler| handler.as_str() == name)
    }
}

/// One chained subsystem: an event of `source` produces commands for others.
#[derive(Debug, Clone, Copy)]
pub struct Route {
    pub source: CapabilityId,
    pub event: &'static str,
    /// `(target, command name)` issued for every matching event.
    pub derived: &'static [(CapabilityId, &'static str)],
}

pub const ROUTES: &[Route] = &[
    Route {
        source: CapabilityId::Stt,
        event: "text_recognized",
        derived: &[
            (CapabilityId::Nlp, "process_input"),
            (CapabilityId::Emotion, "analyze_text"),
        ],
    },
    Route {
        source: CapabilityId::Nlp,
        event: "processing_complete",
        derived: &[(CapabilityId::Tts, "speak")],
    },
];

/// Commands the routing table derives from `envelope`.
///
/// Blank recognized text derives nothing; `speak` is only derived while
/// `voice_output` is on and the response has something to say.
pub fn derive_commands(envelope: &EventEnvelope, voice_output: bool) -> Vec<CommandEnvelope> {
    let name = envelope.name();
    ROUTES
        .iter()
        .filter(|route| route.source == envelope.source && route.event == name)
        .flat_map(|route| route.derived.iter())
        .filter_map(|&(target, command)| {
            derive(command, &envelope.event, voice_output)
                .map(|command| CommandEnvelope::new(target, command))
        })
        .collect()
}

fn derive(command: &str, event: &Event, voice_output: bool) -> Option<Command> {
    match (command, event) {
        ("process_input", Event::TextRecognized { text, .. }) => {
            non_blank(text).map(|text| Command::ProcessInput { text })
        }
        ("analyze_text", Event::TextRecognized { text, .. }) => {
            non_blank(text).map(|text| Command::AnalyzeText { text })
        }
        ("speak", Event::ProcessingComplete(response)) if voice_output => {
            non_blank(&response.text_to_speak).map(|text| Command::Speak { text })
        }
        _ => None,
    }
}

fn non_blank(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_owned())
}
