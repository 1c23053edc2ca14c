//! Speech recognition.
//!
//! - [`command`]: runs an external recognizer process that prints one
//!   recognized utterance per stdout line.
//! - [`simulated`]: reports a fixed phrase a moment after listening starts.
//!
//! Listening is a toggle: `start_listening` while already listening and
//! `stop_listening` while idle are both no-ops.

pub mod command;
pub mod simulated;

pub use command::{CommandSttProvider, CommandSttWorker};
pub use simulated::{SimulatedSttProvider, SimulatedSttWorker};

pub(crate) const STT_COMMANDS: &[&str] = &[
    "start_listening",
    "stop_listening",
    "set_language",
    "initialize_microphone",
];

pub(crate) const STT_EVENTS: &[&str] = &[
    "text_recognized",
    "listening_started",
    "listening_stopped",
    "vad_status",
    "listening_error",
    "error",
];

/// Confidence reported when the recognizer does not supply one.
pub const DEFAULT_CONFIDENCE: f32 = 1.0;

/// Parse one recognizer output line.
///
/// Accepts either plain text or `<confidence>\t<text>`. Blank lines yield
/// `None`.
pub fn parse_recognition(line: &str) -> Option<(String, f32)> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if let Some((head, rest)) = line.split_once('\t') {
        if let Ok(confidence) = head.trim().parse::<f32>() {
            let text = rest.trim();
            if text.is_empty() {
                return None;
            }
            return Some((text.to_owned(), confidence.clamp(0.0, 1.0)));
        }
    }
    Some((line.to_owned(), DEFAULT_CONFIDENCE))
}
