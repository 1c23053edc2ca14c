//! Response generation for user input.
//!
//! - [`chat`]: OpenAI-compatible chat-completions backend over HTTP.
//! - [`canned`]: static robot facts, used when no endpoint is configured.

pub mod canned;
pub mod chat;

pub use canned::{CannedNlpProvider, CannedNlpWorker, RobotFacts};
pub use chat::{ChatNlpProvider, ChatNlpWorker};

use crate::worker::{NlpResponse, SegmentStyle};
use chrono::Utc;

pub(crate) const NLP_COMMANDS: &[&str] = &["process_input"];
pub(crate) const NLP_EVENTS: &[&str] = &["processing_complete", "error"];

/// Response with a single normal display segment.
pub(crate) fn plain_response(kind: &str, input: &str, text: String) -> NlpResponse {
    NlpResponse {
        kind: kind.to_owned(),
        display: vec![(SegmentStyle::Normal, text.clone())],
        text_to_speak: text,
        original_input: input.to_owned(),
        timestamp: Utc::now(),
        detected_emotion: None,
        response_emotion: None,
        action: None,
    }
}

/// First `max_chars` characters of `text`, trimmed.
pub(crate) fn excerpt(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect::<String>().trim().to_owned()
}
