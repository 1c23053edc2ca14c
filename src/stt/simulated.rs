//! Recognizer stand-in that hears the same phrase every time.

use super::{STT_COMMANDS, STT_EVENTS};
use crate::capability::CapabilityId;
use crate::config::{RobotConfig, SttConfig};
use crate::error::Result;
use crate::resolver::{ProviderKind, WorkerProvider};
use crate::worker::{Command, Event, Worker, WorkerContext, unsupported};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Phrase reported after each `start_listening`.
pub const SIMULATED_PHRASE: &str = "Fallback voice input: This is a test.";
/// Confidence attached to [`SIMULATED_PHRASE`].
pub const SIMULATED_CONFIDENCE: f32 = 0.85;

pub struct SimulatedSttWorker {
    language: String,
    phrase_delay: Duration,
    /// Cancels the pending phrase; `Some` while listening.
    listening: Option<CancellationToken>,
}

impl SimulatedSttWorker {
    pub fn new(config: &SttConfig) -> Self {
        Self {
            language: config.language.clone(),
            phrase_delay: Duration::from_millis(config.simulated_phrase_delay_ms),
            listening: None,
        }
    }

    pub fn is_listening(&self) -> bool {
        self.listening.is_some()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    fn start_listening(&mut self, ctx: &WorkerContext) {
        if self.is_listening() {
            return;
        }
        ctx.emit(Event::ListeningStarted);
        ctx.emit(Event::VadStatus {
            speech_detected: true,
        });

        let cancel = ctx.stop_token().child_token();
        let guard = cancel.clone();
        let emitter = ctx.emitter().clone();
        let delay = self.phrase_delay;
        tokio::spawn(async move {
            tokio::select! {
                () = guard.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    emitter.emit(Event::TextRecognized {
                        text: SIMULATED_PHRASE.to_owned(),
                        confidence: SIMULATED_CONFIDENCE,
                    });
                    emitter.emit(Event::VadStatus { speech_detected: false });
                }
            }
        });
        self.listening = Some(cancel);
    }

    fn stop_listening(&mut self, ctx: &WorkerContext) {
        let Some(pending) = self.listening.take() else {
            return;
        };
        pending.cancel();
        ctx.emit(Event::VadStatus {
            speech_detected: false,
        });
        ctx.emit(Event::ListeningStopped);
    }
}

#[async_trait]
impl Worker for SimulatedSttWorker {
    fn capability(&self) -> CapabilityId {
        CapabilityId::Stt
    }

    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        debug!(command = command.name(), "fallback call");
        match command {
            Command::StartListening => self.start_listening(ctx),
            Command::StopListening => self.stop_listening(ctx),
            Command::SetLanguage { code } => self.language = code,
            Command::InitializeMicrophone => {}
            other => return Err(unsupported(CapabilityId::Stt, &other)),
        }
        Ok(())
    }

    async fn shutdown(&mut self, ctx: &WorkerContext) {
        self.stop_listening(ctx);
    }
}

pub struct SimulatedSttProvider;

impl WorkerProvider for SimulatedSttProvider {
    fn name(&self) -> &str {
        "simulated-stt"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::Stt
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Fallback
    }

    fn commands(&self) -> &'static [&'static str] {
        STT_COMMANDS
    }

    fn events(&self) -> &'static [&'static str] {
        STT_EVENTS
    }

    fn probe(&self, _config: &RobotConfig) -> Result<()> {
        Ok(())
    }

    fn build(&self, config: &RobotConfig) -> Result<Box<dyn Worker>> {
        Ok(Box::new(SimulatedSttWorker::new(&config.stt)))
    }
}
