//! Shared helpers for integration tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use updogo::capability::CapabilityId;
use updogo::config::RobotConfig;
use updogo::orchestrator::{NoticeLevel, Presenter, Speaker};
use updogo::resolver::{ModuleResolver, ProviderKind, Registry, ResolutionReport, WorkerProvider};
use updogo::worker::{
    Command, CommandInbox, EventEnvelope, Frame, NlpResponse, Voice, Worker, WorkerContext,
    WorkerState,
};
use updogo::{ModuleStatus, Result, RobotError};

/// Config that pins every capability to its fallback and keeps timings short.
pub(crate) fn fallback_config(dir: &std::path::Path) -> RobotConfig {
    let mut config = RobotConfig::default();
    config.capabilities.force_fallback = CapabilityId::ALL.to_vec();
    config.stt.simulated_phrase_delay_ms = 50;
    config.camera.frame_interval_ms = 5;
    config.camera.width = 32;
    config.camera.height = 24;
    config.image_save.directory = dir.join("snapshots");
    config.supervisor.shutdown_timeout_ms = 1_000;
    config.supervisor.terminate_grace_ms = 200;
    config
}

/// Resolve the built-in registry against `config`.
pub(crate) fn builtin_report(config: &RobotConfig) -> ResolutionReport {
    let registry = Registry::builtin().expect("builtin registry");
    ModuleResolver::new(&registry, config).resolve_all()
}

/// Receive events until `done` matches one, failing after five seconds.
pub(crate) async fn collect_until(
    rx: &mut mpsc::UnboundedReceiver<EventEnvelope>,
    mut done: impl FnMut(&EventEnvelope) -> bool,
) -> Vec<EventEnvelope> {
    let mut seen = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(envelope) = rx.recv().await {
            let finished = done(&envelope);
            seen.push(envelope);
            if finished {
                break;
            }
        }
    })
    .await
    .expect("expected event did not arrive in time");
    seen
}

/// Event names in arrival order.
pub(crate) fn names(events: &[EventEnvelope]) -> Vec<&'static str> {
    events.iter().map(EventEnvelope::name).collect()
}

// ── Stub providers ──────────────────────────────────────────────────────────

/// Real provider whose availability is fixed; builds the capability's
/// registered fallback worker when available.
pub(crate) struct StubRealProvider {
    pub fallback: Arc<dyn WorkerProvider>,
    pub available: bool,
}

impl WorkerProvider for StubRealProvider {
    fn name(&self) -> &str {
        "stub-real"
    }

    fn capability(&self) -> CapabilityId {
        self.fallback.capability()
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Real
    }

    fn commands(&self) -> &'static [&'static str] {
        self.fallback.commands()
    }

    fn events(&self) -> &'static [&'static str] {
        self.fallback.events()
    }

    fn probe(&self, _config: &RobotConfig) -> Result<()> {
        if self.available {
            Ok(())
        } else {
            Err(RobotError::Device("unplugged".into()))
        }
    }

    fn build(&self, config: &RobotConfig) -> Result<Box<dyn Worker>> {
        self.fallback.build(config)
    }
}

/// How a [`MisbehavingWorker`] reacts to stop requests.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Misbehaviour {
    /// Keeps yielding to the runtime but never looks at the stop flag.
    IgnoresStop,
    /// Blocks its thread without yielding for the given time.
    Blocks(Duration),
}

/// Looping worker that does not honour cooperative stop.
pub(crate) struct MisbehavingWorker {
    pub capability: CapabilityId,
    pub misbehaviour: Misbehaviour,
}

#[async_trait]
impl Worker for MisbehavingWorker {
    fn capability(&self) -> CapabilityId {
        self.capability
    }

    fn activation(&self) -> updogo::worker::Activation {
        updogo::worker::Activation::Looping
    }

    async fn handle(&mut self, _command: Command, _ctx: &WorkerContext) -> Result<()> {
        Ok(())
    }

    async fn run_loop(&mut self, _inbox: &mut CommandInbox, ctx: &WorkerContext) -> Result<()> {
        ctx.mark_running();
        match self.misbehaviour {
            Misbehaviour::IgnoresStop => loop {
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
            Misbehaviour::Blocks(duration) => {
                // Yield once so the supervisor sees the task as launched.
                tokio::task::yield_now().await;
                std::thread::sleep(duration);
                Ok(())
            }
        }
    }
}

/// Provider for a [`MisbehavingWorker`], registered as the capability's
/// fallback so it is always selected.
pub(crate) struct MisbehavingProvider {
    pub capability: CapabilityId,
    pub misbehaviour: Misbehaviour,
}

impl WorkerProvider for MisbehavingProvider {
    fn name(&self) -> &str {
        "misbehaving"
    }

    fn capability(&self) -> CapabilityId {
        self.capability
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Fallback
    }

    fn commands(&self) -> &'static [&'static str] {
        self.capability.contract().commands
    }

    fn events(&self) -> &'static [&'static str] {
        self.capability.contract().events
    }

    fn probe(&self, _config: &RobotConfig) -> Result<()> {
        Ok(())
    }

    fn build(&self, _config: &RobotConfig) -> Result<Box<dyn Worker>> {
        Ok(Box::new(MisbehavingWorker {
            capability: self.capability,
            misbehaviour: self.misbehaviour,
        }))
    }
}

// ── Recording presenter ─────────────────────────────────────────────────────

/// Everything a presenter was asked to show, in order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Shown {
    Message(Speaker, String),
    Response(String),
    Notice(NoticeLevel, String),
    Speaking(bool),
    Listening(bool),
    VoiceActivity(bool),
    Emotion(String),
    Expression(String),
    Frame(u64),
    CameraActive(bool),
    Voices(usize, Option<String>),
    Status(usize, usize),
    Cleared,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingPresenter {
    pub shown: Vec<Shown>,
}

impl RecordingPresenter {
    pub(crate) fn contains(&self, item: &Shown) -> bool {
        self.shown.contains(item)
    }

    pub(crate) fn notices(&self, level: NoticeLevel) -> Vec<&str> {
        self.shown
            .iter()
            .filter_map(|shown| match shown {
                Shown::Notice(l, message) if *l == level => Some(message.as_str()),
                _ => None,
            })
            .collect()
    }
}

impl Presenter for RecordingPresenter {
    fn show_message(&mut self, speaker: Speaker, text: &str) {
        self.shown.push(Shown::Message(speaker, text.to_owned()));
    }

    fn show_response(&mut self, response: &NlpResponse) {
        self.shown.push(Shown::Response(response.text_to_speak.clone()));
    }

    fn show_notice(&mut self, level: NoticeLevel, message: &str, _duration: Option<Duration>) {
        self.shown.push(Shown::Notice(level, message.to_owned()));
    }

    fn set_speaking(&mut self, speaking: bool) {
        self.shown.push(Shown::Speaking(speaking));
    }

    fn set_listening(&mut self, listening: bool) {
        self.shown.push(Shown::Listening(listening));
    }

    fn set_voice_activity(&mut self, speech_detected: bool) {
        self.shown.push(Shown::VoiceActivity(speech_detected));
    }

    fn show_emotion(&mut self, emotion: &str, _confidence: f32) {
        self.shown.push(Shown::Emotion(emotion.to_owned()));
    }

    fn set_expression(&mut self, emotion: &str) {
        self.shown.push(Shown::Expression(emotion.to_owned()));
    }

    fn show_frame(&mut self, frame: &Frame) {
        self.shown.push(Shown::Frame(frame.sequence));
    }

    fn set_camera_active(&mut self, active: bool) {
        self.shown.push(Shown::CameraActive(active));
    }

    fn show_voices(&mut self, voices: &[Voice], selected: Option<&str>) {
        self.shown
            .push(Shown::Voices(voices.len(), selected.map(str::to_owned)));
    }

    fn show_status(&mut self, status: &ModuleStatus, _states: &BTreeMap<CapabilityId, WorkerState>) {
        self.shown
            .push(Shown::Status(status.active.len(), status.fallback.len()));
    }

    fn clear(&mut self) {
        self.shown.push(Shown::Cleared);
    }
}
