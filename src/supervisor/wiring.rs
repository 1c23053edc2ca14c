//! Declarative event/command wiring between workers and the orchestrator.
//!
//! Each capability has a static table of `(event, handler)` pairs, naming the
//! orchestrator handler that consumes an event, and `(command, entry point)`
//! pairs, naming the worker entry point a command is delivered to. Wiring a
//! worker checks every pair against what the handler side and the worker
//! side actually provide. Broken pairs are reported and skipped; the rest of
//! the table is still wired.

use crate::capability::CapabilityId;
use std::fmt;

/// Static wiring for one capability.
#[derive(Debug, Clone, Copy)]
pub struct WiringTable {
    pub capability: CapabilityId,
    /// `(event name, orchestrator handler name)`.
    pub events: &'static [(&'static str, &'static str)],
    /// `(command name, worker entry point name)`.
    pub commands: &'static [(&'static str, &'static str)],
}

const TTS_WIRING: WiringTable = WiringTable {
    capability: CapabilityId::Tts,
    events: &[
        ("speech_started", "on_speech_started"),
        ("speech_word_boundary", "on_word_boundary"),
        ("speech_finished", "on_speech_finished"),
        ("available_voices", "on_available_voices"),
        ("error", "on_worker_error"),
        ("status", "on_status"),
        ("completed", "on_completed"),
    ],
    commands: &[
        ("speak", "speak"),
        ("stop_speaking", "stop_speaking"),
        ("set_voice", "set_voice"),
        ("set_rate", "set_rate"),
        ("set_volume", "set_volume"),
        ("initialize_engine", "initialize_engine"),
    ],
};

const STT_WIRING: WiringTable = WiringTable {
    capability: CapabilityId::Stt,
    events: &[
        ("text_recognized", "on_text_recognized"),
        ("listening_started", "on_listening_started"),
        ("listening_stopped", "on_listening_stopped"),
        ("vad_status", "on_vad_status"),
        ("listening_error", "on_listening_error"),
        ("error", "on_worker_error"),
        ("status", "on_status"),
        ("completed", "on_completed"),
    ],
    commands: &[
        ("start_listening", "start_listening"),
        ("stop_listening", "stop_listening"),
        ("set_language", "set_language"),
        ("initialize_microphone", "initialize_microphone"),
    ],
};

const EMOTION_WIRING: WiringTable = WiringTable {
    capability: CapabilityId::Emotion,
    events: &[
        ("emotion_detected", "on_emotion_detected"),
        ("error", "on_worker_error"),
        ("status", "on_status"),
        ("completed", "on_completed"),
    ],
    commands: &[("analyze_text", "analyze_text")],
};

const NLP_WIRING: WiringTable = WiringTable {
    capability: CapabilityId::Nlp,
    events: &[
        ("processing_complete", "on_nlp_result"),
        ("error", "on_worker_error"),
        ("status", "on_status"),
        ("completed", "on_completed"),
    ],
    commands: &[("process_input", "process_input")],
};

const CAMERA_WIRING: WiringTable = WiringTable {
    capability: CapabilityId::Camera,
    events: &[
        ("frame_ready", "on_frame_ready"),
        ("error", "on_worker_error"),
        ("status", "on_status"),
        ("completed", "on_completed"),
    ],
    commands: &[("set_filter", "set_filter"), ("stop", "stop")],
};

const IMAGE_SAVE_WIRING: WiringTable = WiringTable {
    capability: CapabilityId::ImageSave,
    events: &[
        ("image_saved", "on_image_saved"),
        ("error", "on_worker_error"),
        ("status", "on_status"),
        ("completed", "on_completed"),
    ],
    commands: &[("save_image", "save_image")],
};

/// Every built-in wiring table, in capability order.
pub static DEFAULT_WIRING: [WiringTable; 6] = [
    TTS_WIRING,
    STT_WIRING,
    EMOTION_WIRING,
    NLP_WIRING,
    CAMERA_WIRING,
    IMAGE_SAVE_WIRING,
];

/// Built-in wiring table for `capability`.
pub fn default_wiring(capability: CapabilityId) -> &'static WiringTable {
    match capability {
        CapabilityId::Tts => &DEFAULT_WIRING[0],
        CapabilityId::Stt => &DEFAULT_WIRING[1],
        CapabilityId::Emotion => &DEFAULT_WIRING[2],
        CapabilityId::Nlp => &DEFAULT_WIRING[3],
        CapabilityId::Camera => &DEFAULT_WIRING[4],
        CapabilityId::ImageSave => &DEFAULT_WIRING[5],
    }
}

/// One pair that could not be wired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WiringError {
    /// The orchestrator has no handler with this name.
    MissingHandler {
        event: &'static str,
        handler: &'static str,
    },
    /// The worker never emits this event.
    MissingEvent { event: &'static str },
    /// The worker has no entry point for this command.
    MissingEntryPoint {
        command: &'static str,
        entry_point: &'static str,
    },
    /// The table belongs to another capability.
    WrongCapability { table: CapabilityId },
    /// The worker failed setup and cannot be wired.
    NotSetUp,
}

impl fmt::Display for WiringError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHandler { event, handler } => {
                write!(f, "no handler {handler} for event {event}")
            }
            Self::MissingEvent { event } => write!(f, "worker does not emit {event}"),
            Self::MissingEntryPoint {
                command,
                entry_point,
            } => write!(f, "no entry point {entry_point} for command {command}"),
            Self::WrongCapability { table } => write!(f, "wiring table is for {table}"),
            Self::NotSetUp => f.write_str("worker was not set up"),
        }
    }
}

/// Outcome of wiring one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WiringReport {
    pub capability: CapabilityId,
    /// Events now delivered to a handler.
    pub events: Vec<&'static str>,
    /// Commands now accepted by [`super::WorkerSupervisor::send`].
    pub commands: Vec<&'static str>,
    pub errors: Vec<WiringError>,
}

impl WiringReport {
    pub(crate) fn empty(capability: CapabilityId) -> Self {
        Self {
            capability,
            events: Vec::new(),
            commands: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
    }
}
