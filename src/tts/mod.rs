//! Text-to-speech.
//!
//! - [`command`]: drives an installed speech engine (`espeak-ng`, `espeak`,
//!   macOS `say`) with one child process per utterance.
//! - [`simulated`]: timer-driven stand-in that emits the same event sequence
//!   without producing audio.
//!
//! Both guarantee one `speech_finished` for every `speech_started`, including
//! when an utterance is interrupted by `stop_speaking`, a new `speak`, or
//! worker shutdown.

pub mod command;
pub mod simulated;

pub use command::{CommandTtsProvider, CommandTtsWorker};
pub use simulated::{SimulatedTtsProvider, SimulatedTtsWorker};

use crate::config::{MAX_SPEECH_RATE, MIN_SPEECH_RATE};
use crate::worker::{Event, EventEmitter};
use std::future::Future;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) const TTS_COMMANDS: &[&str] = &[
    "speak",
    "stop_speaking",
    "set_voice",
    "set_rate",
    "set_volume",
    "initialize_engine",
];

pub(crate) const TTS_EVENTS: &[&str] = &[
    "speech_started",
    "speech_word_boundary",
    "speech_finished",
    "available_voices",
    "error",
];

/// Clamp a requested speaking rate to the supported range.
pub fn clamp_rate(rate: i32) -> i32 {
    rate.clamp(MIN_SPEECH_RATE, MAX_SPEECH_RATE)
}

/// Clamp a requested volume to 0–100 percent.
pub fn clamp_volume(volume: u8) -> u8 {
    volume.min(100)
}

/// Words of `text` with their byte offset.
pub(crate) fn word_positions(text: &str) -> Vec<(usize, &str)> {
    text.split_whitespace()
        .map(|word| (word.as_ptr() as usize - text.as_ptr() as usize, word))
        .collect()
}

/// One utterance in progress on a helper task.
///
/// The task owns the `speech_finished` event: it emits it exactly once,
/// whether the utterance completes or is cancelled.
pub(crate) struct Utterance {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Utterance {
    /// Spawn `playback` for `text`. Cancellation drops `playback` (killing
    /// any child process it owns); `speech_finished(text)` follows either way.
    pub(crate) fn spawn<Fut>(parent: &CancellationToken, emitter: EventEmitter, text: String, playback: Fut) -> Self
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = parent.child_token();
        let guard = cancel.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                () = playback => {}
                () = guard.cancelled() => debug!("utterance interrupted"),
            }
            emitter.emit(Event::SpeechFinished { text });
        });
        Self { cancel, task }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel and wait until `speech_finished` has been emitted.
    pub(crate) async fn interrupt(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            debug!(error = %e, "utterance task ended abnormally");
        }
    }
}

/// Interrupt the utterance in `slot`, if any.
pub(crate) async fn interrupt(slot: &mut Option<Utterance>) {
    if let Some(utterance) = slot.take() {
        utterance.interrupt().await;
    }
}
