//! Presentation seam between the orchestrator and whatever renders it.

use crate::capability::CapabilityId;
use crate::resolver::ModuleStatus;
use crate::worker::{Frame, NlpResponse, Voice, WorkerState};
use std::collections::BTreeMap;
use std::time::Duration;

/// Who said a chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Robot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Receives everything the orchestrator wants shown to the user.
///
/// Every method defaults to a no-op so a presenter only implements what it
/// can display. Methods are called from the orchestrator loop and must not
/// block.
pub trait Presenter: Send {
    fn show_message(&mut self, _speaker: Speaker, _text: &str) {}

    /// A processed answer with its styled segments.
    fn show_response(&mut self, _response: &NlpResponse) {}

    /// Transient notice; `duration` is how long it should stay visible.
    fn show_notice(&mut self, _level: NoticeLevel, _message: &str, _duration: Option<Duration>) {}

    fn set_speaking(&mut self, _speaking: bool) {}

    fn highlight_word(&mut self, _word: &str) {}

    fn set_listening(&mut self, _listening: bool) {}

    fn set_voice_activity(&mut self, _speech_detected: bool) {}

    fn show_emotion(&mut self, _emotion: &str, _confidence: f32) {}

    /// Expression the robot should wear while answering.
    fn set_expression(&mut self, _emotion: &str) {}

    fn show_frame(&mut self, _frame: &Frame) {}

    fn set_camera_active(&mut self, _active: bool) {}

    fn show_voices(&mut self, _voices: &[Voice], _selected: Option<&str>) {}

    fn show_status(&mut self, _status: &ModuleStatus, _states: &BTreeMap<CapabilityId, WorkerState>) {}

    fn clear(&mut self) {}
}

/// Presenter that shows nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPresenter;

impl Presenter for NullPresenter {}
