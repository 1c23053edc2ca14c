//! Capability identities and their command/event contracts.
//!
//! A capability is one optional subsystem of the robot. Its
//! [`CapabilityContract`] lists the command names a worker must accept and
//! the event names it may emit. Real backends and fallbacks for the same
//! capability are held to the same contract.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one optional subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityId {
    Tts,
    Stt,
    Emotion,
    Nlp,
    Camera,
    ImageSave,
}

impl CapabilityId {
    /// Every capability in registry order.
    pub const ALL: [Self; 6] = [
        Self::Tts,
        Self::Stt,
        Self::Emotion,
        Self::Nlp,
        Self::Camera,
        Self::ImageSave,
    ];

    /// Render the capability name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tts => "tts",
            Self::Stt => "stt",
            Self::Emotion => "emotion",
            Self::Nlp => "nlp",
            Self::Camera => "camera",
            Self::ImageSave => "image_save",
        }
    }

    /// Parse a capability name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "tts" => Some(Self::Tts),
            "stt" => Some(Self::Stt),
            "emotion" => Some(Self::Emotion),
            "nlp" => Some(Self::Nlp),
            "camera" => Some(Self::Camera),
            "image_save" => Some(Self::ImageSave),
            _ => None,
        }
    }

    /// The contract every worker for this capability must satisfy.
    #[must_use]
    pub fn contract(self) -> &'static CapabilityContract {
        match self {
            Self::Tts => &TTS_CONTRACT,
            Self::Stt => &STT_CONTRACT,
            Self::Emotion => &EMOTION_CONTRACT,
            Self::Nlp => &NLP_CONTRACT,
            Self::Camera => &CAMERA_CONTRACT,
            Self::ImageSave => &IMAGE_SAVE_CONTRACT,
        }
    }

    /// Whether the worker runs a continuous read-process-emit loop.
    #[must_use]
    pub fn is_looping(self) -> bool {
        matches!(self, Self::Camera)
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Events every worker may emit regardless of capability.
pub const GENERIC_EVENTS: &[&str] = &["error", "completed", "status"];

/// Command and event names for one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityContract {
    pub capability: CapabilityId,
    pub commands: &'static [&'static str],
    pub events: &'static [&'static str],
}

impl CapabilityContract {
    /// Whether `name` is a command of this capability.
    #[must_use]
    pub fn accepts_command(&self, name: &str) -> bool {
        self.commands.contains(&name)
    }

    /// Whether `name` is a capability event or one of the [`GENERIC_EVENTS`].
    #[must_use]
    pub fn declares_event(&self, name: &str) -> bool {
        self.events.contains(&name) || GENERIC_EVENTS.contains(&name)
    }

    /// Contract members absent from an implementation's declared surface.
    ///
    /// Returns an empty list when the implementation covers the whole
    /// contract. Generic events are implemented by the worker runtime and are
    /// never reported missing.
    #[must_use]
    pub fn missing_members(&self, commands: &[&str], events: &[&str]) -> Vec<String> {
        let missing_commands = self
            .commands
            .iter()
            .filter(|c| !commands.contains(c))
            .map(|c| format!("command {c}"));
        let missing_events = self
            .events
            .iter()
            .filter(|e| !GENERIC_EVENTS.contains(e) && !events.contains(e))
            .map(|e| format!("event {e}"));
        missing_commands.chain(missing_events).collect()
    }
}

pub static TTS_CONTRACT: CapabilityContract = CapabilityContract {
    capability: CapabilityId::Tts,
    commands: &[
        "speak",
        "stop_speaking",
        "set_voice",
        "set_rate",
        "set_volume",
        "initialize_engine",
    ],
    events: &[
        "speech_started",
        "speech_word_boundary",
        "speech_finished",
        "available_voices",
        "error",
    ],
};

pub static STT_CONTRACT: CapabilityContract = CapabilityContract {
    capability: CapabilityId::Stt,
    commands: &[
        "start_listening",
        "stop_listening",
        "set_language",
        "initialize_microphone",
    ],
    events: &[
        "text_recognized",
        "listening_started",
        "listening_stopped",
        "vad_status",
        "listening_error",
        "error",
    ],
};

pub static EMOTION_CONTRACT: CapabilityContract = CapabilityContract {
    capability: CapabilityId::Emotion,
    commands: &["analyze_text"],
    events: &["emotion_detected", "error"],
};

pub static NLP_CONTRACT: CapabilityContract = CapabilityContract {
    capability: CapabilityId::Nlp,
    commands: &["process_input"],
    events: &["processing_complete", "error"],
};

pub static CAMERA_CONTRACT: CapabilityContract = CapabilityContract {
    capability: CapabilityId::Camera,
    commands: &["set_filter", "stop"],
    events: &["frame_ready", "error"],
};

pub static IMAGE_SAVE_CONTRACT: CapabilityContract = CapabilityContract {
    capability: CapabilityId::ImageSave,
    commands: &["save_image"],
    events: &["image_saved", "error"],
};
