//! The coordination loop: consumes every worker event, issues every command.
//!
//! The orchestrator never waits on a worker. Routed commands are queued with
//! [`WorkerSupervisor::send`] and their effects arrive later as events on the
//! shared channel, which [`Orchestrator::run`] drains alongside user actions.

pub mod actions;
pub mod presenter;
pub mod routes;

pub use actions::{ActionError, HELP, UiAction};
pub use presenter::{NoticeLevel, NullPresenter, Presenter, Speaker};
pub use routes::{Handler, ROUTES, Route, derive_commands};

use crate::camera::CameraFilter;
use crate::capability::CapabilityId;
use crate::config::RobotConfig;
use crate::resolver::ResolutionReport;
use crate::supervisor::{ShutdownReport, WorkerSupervisor};
use crate::worker::{Command, CommandEnvelope, Event, EventEnvelope, Frame, Voice};
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const DEGRADED_NOTICE_DURATION: Duration = Duration::from_secs(15);
const LISTENING_NOTICE_DURATION: Duration = Duration::from_secs(3);
const FILTER_NOTICE_DURATION: Duration = Duration::from_secs(2);
const ERROR_NOTICE_DURATION: Duration = Duration::from_secs(7);

/// User-visible switches, mirrored from worker events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Toggles {
    pub listening: bool,
    pub camera: bool,
    pub speaking: bool,
    pub voice_output: bool,
}

/// Whether the loop should keep going after an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Orchestrator<P: Presenter> {
    config: RobotConfig,
    report: ResolutionReport,
    supervisor: WorkerSupervisor,
    events: mpsc::UnboundedReceiver<EventEnvelope>,
    presenter: P,
    toggles: Toggles,
    camera_filter: CameraFilter,
    last_frame: Option<Frame>,
    selected_voice: Option<String>,
}

impl<P: Presenter> Orchestrator<P> {
    /// Set up, wire and start one worker per resolved capability, then issue
    /// the startup commands.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: RobotConfig, report: ResolutionReport, presenter: P) -> Self {
        let (mut supervisor, events) = WorkerSupervisor::new();
        let failed = supervisor.setup_all(&report, &config);
        for wiring in supervisor.wire_all(&Handler::NAMES) {
            if !wiring.is_complete() {
                warn!(
                    capability = %wiring.capability,
                    errors = wiring.errors.len(),
                    "worker wired incompletely"
                );
            }
        }
        supervisor.start_all(config.orchestrator.camera_autostart);

        let camera = config.orchestrator.camera_autostart
            && supervisor
                .handle(CapabilityId::Camera)
                .is_some_and(|handle| handle.state().is_active());
        let toggles = Toggles {
            listening: false,
            camera,
            speaking: false,
            voice_output: config.orchestrator.voice_output,
        };
        let camera_filter = CameraFilter::parse(&config.camera.filter).unwrap_or_default();
        let selected_voice = config.tts.voice.clone();

        let mut orchestrator = Self {
            config,
            report,
            supervisor,
            events,
            presenter,
            toggles,
            camera_filter,
            last_frame: None,
            selected_voice,
        };
        orchestrator.startup(&failed);
        orchestrator
    }

    fn startup(&mut self, failed: &[CapabilityId]) {
        self.send(CapabilityId::Tts, Command::InitializeEngine);
        self.send(CapabilityId::Stt, Command::InitializeMicrophone);

        let status = self.report.get_status();
        if !status.fallback.is_empty() || !failed.is_empty() {
            let mut degraded: Vec<String> = status.fallback.iter().map(ToString::to_string).collect();
            degraded.extend(failed.iter().map(|c| format!("{c} (failed)")));
            let message = format!(
                "Running with reduced functionality: {}. Check logs.",
                degraded.join(", ")
            );
            warn!(degraded = %degraded.join(", "), "starting degraded");
            self.presenter
                .show_notice(NoticeLevel::Warning, &message, Some(DEGRADED_NOTICE_DURATION));
        } else {
            info!("all capabilities running on real backends");
        }
        self.presenter.set_camera_active(self.toggles.camera);

        if self.config.orchestrator.listen_on_start {
            self.send(CapabilityId::Stt, Command::StartListening);
        }
    }

    pub fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn supervisor(&self) -> &WorkerSupervisor {
        &self.supervisor
    }

    pub fn report(&self) -> &ResolutionReport {
        &self.report
    }

    pub fn toggles(&self) -> Toggles {
        self.toggles
    }

    /// Most recent camera frame, kept for snapshots.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.last_frame.as_ref()
    }

    fn send(&self, target: CapabilityId, command: Command) -> bool {
        self.supervisor.send(CommandEnvelope::new(target, command))
    }

    /// Wait for the next worker event and handle it.
    ///
    /// Returns false once the event channel is closed.
    pub async fn process_next_event(&mut self) -> bool {
        match self.events.recv().await {
            Some(envelope) => {
                self.handle_event(envelope);
                true
            }
            None => false,
        }
    }

    /// Dispatch one event to its wired handler and apply the routing table.
    pub fn handle_event(&mut self, envelope: EventEnvelope) {
        let source = envelope.source;
        if !self.supervisor.is_current(&envelope) {
            debug!(
                capability = %source,
                event = envelope.name(),
                generation = envelope.generation,
                "event from replaced worker ignored"
            );
            return;
        }
        let Some(handler) = self
            .supervisor
            .handler_for(source, envelope.name())
            .and_then(Handler::parse)
        else {
            debug!(capability = %source, event = envelope.name(), "event has no handler");
            return;
        };

        for command in derive_commands(&envelope, self.toggles.voice_output) {
            let (target, name) = (command.target, command.command.name());
            if !self.supervisor.send(command) {
                warn!(from = %source, to = %target, command = name, "routed command not delivered");
            }
        }

        match (handler, envelope.event) {
            (Handler::SpeechStarted, Event::SpeechStarted { text }) => {
                debug!(chars = text.len(), "speech started");
                self.toggles.speaking = true;
                self.presenter.set_speaking(true);
            }
            (Handler::WordBoundary, Event::SpeechWordBoundary { word, .. }) => {
                self.presenter.highlight_word(&word);
            }
            (Handler::SpeechFinished, Event::SpeechFinished { .. }) => {
                self.toggles.speaking = false;
                self.presenter.set_speaking(false);
            }
            (Handler::AvailableVoices, Event::AvailableVoices { voices }) => self.on_available_voices(&voices),
            (Handler::TextRecognized, Event::TextRecognized { text, confidence }) => {
                let text = text.trim();
                if text.is_empty() {
                    debug!("empty recognition ignored");
                } else {
                    info!(confidence, "voice input recognized");
                    self.presenter
                        .show_message(Speaker::User, &format!("(Voice Input) {text}"));
                }
            }
            (Handler::ListeningStarted, Event::ListeningStarted) => {
                self.set_listening(true);
                self.presenter.show_notice(
                    NoticeLevel::Info,
                    "Listening for voice input...",
                    Some(LISTENING_NOTICE_DURATION),
                );
            }
            (Handler::ListeningStopped, Event::ListeningStopped) => {
                self.set_listening(false);
                self.presenter.show_notice(
                    NoticeLevel::Info,
                    "Voice listening stopped.",
                    Some(LISTENING_NOTICE_DURATION),
                );
            }
            (Handler::VadStatus, Event::VadStatus { speech_detected }) => {
                self.presenter.set_voice_activity(speech_detected);
            }
            (Handler::ListeningError, Event::ListeningError { kind, message }) => {
                error!(%kind, %message, "voice input error");
                self.set_listening(false);
                self.presenter.show_notice(
                    NoticeLevel::Error,
                    &format!("Voice Input Error: {message}"),
                    Some(ERROR_NOTICE_DURATION),
                );
            }
            (Handler::EmotionDetected, Event::EmotionDetected { emotion, confidence }) => {
                debug!(%emotion, confidence, "emotion detected in user input");
                self.presenter.show_emotion(&emotion, confidence);
            }
            (Handler::NlpResult, Event::ProcessingComplete(response)) => {
                info!(kind = %response.kind, "answer received");
                self.presenter.show_response(&response);
                if let Some(emotion) = &response.response_emotion {
                    self.presenter.set_expression(emotion);
                }
            }
            (Handler::FrameReady, Event::FrameReady(frame)) => {
                if self.toggles.camera {
                    self.presenter.show_frame(&frame);
                    self.last_frame = Some(frame);
                }
            }
            (Handler::ImageSaved, Event::ImageSaved { path }) => {
                info!(path = %path.display(), "snapshot saved");
            }
            (Handler::WorkerError, Event::Error { message }) => self.on_worker_error(source, &message),
            (Handler::Status, Event::Status { message, duration }) => {
                self.presenter.show_notice(NoticeLevel::Info, &message, Some(duration));
            }
            (Handler::Completed, Event::Completed) => {
                debug!(capability = %source, "worker completed");
                match source {
                    CapabilityId::Camera => self.set_camera(false),
                    CapabilityId::Stt => self.set_listening(false),
                    CapabilityId::Tts if self.toggles.speaking => {
                        self.toggles.speaking = false;
                        self.presenter.set_speaking(false);
                    }
                    _ => {}
                }
            }
            (handler, event) => {
                warn!(
                    capability = %source,
                    event = event.name(),
                    handler = handler.as_str(),
                    "event wired to a mismatched handler"
                );
            }
        }
    }

    fn on_available_voices(&mut self, voices: &[Voice]) {
        info!(count = voices.len(), "voices available");
        let preferred = self.selected_voice.as_deref();
        let chosen = preferred
            .and_then(|wanted| voices.iter().find(|v| v.id == wanted || v.name == wanted))
            .or_else(|| voices.first())
            .map(|voice| voice.id.clone());
        self.presenter.show_voices(voices, chosen.as_deref());
        if let Some(voice_id) = chosen {
            self.selected_voice = Some(voice_id.clone());
            self.send(CapabilityId::Tts, Command::SetVoice { voice_id });
        }
    }

    fn on_worker_error(&mut self, source: CapabilityId, message: &str) {
        error!(capability = %source, %message, "worker reported an error");
        self.presenter.show_message(
            Speaker::Robot,
            &format!("Error in {source}: {message}"),
        );
        self.presenter.show_notice(
            NoticeLevel::Error,
            &format!("Error in {source}: {message}"),
            Some(ERROR_NOTICE_DURATION),
        );
        match source {
            CapabilityId::Camera => self.set_camera(false),
            CapabilityId::Stt => self.set_listening(false),
            _ => {}
        }
    }

    fn set_listening(&mut self, listening: bool) {
        self.toggles.listening = listening;
        self.presenter.set_listening(listening);
    }

    fn set_camera(&mut self, active: bool) {
        self.toggles.camera = active;
        if !active {
            self.last_frame = None;
        }
        self.presenter.set_camera_active(active);
    }

    /// Apply one user action.
    pub fn handle_action(&mut self, action: UiAction) -> Flow {
        debug!(?action, "user action");
        match action {
            UiAction::Say(text) => {
                self.presenter.show_message(Speaker::User, &text);
                let typed = EventEnvelope::new(
                    CapabilityId::Stt,
                    Event::TextRecognized {
                        text,
                        confidence: 1.0,
                    },
                );
                for command in derive_commands(&typed, self.toggles.voice_output) {
                    self.supervisor.send(command);
                }
            }
            UiAction::Help => self.presenter.show_notice(NoticeLevel::Info, HELP, None),
            UiAction::Status => {
                let states = self.supervisor.states();
                self.presenter.show_status(&self.report.get_status(), &states);
            }
            UiAction::Clear => {
                self.presenter.clear();
                self.presenter.show_notice(NoticeLevel::Info, "Chat cleared.", None);
            }
            UiAction::Listen(on) => {
                let command = if on {
                    Command::StartListening
                } else {
                    Command::StopListening
                };
                if !self.send(CapabilityId::Stt, command) {
                    self.notice_unavailable("Voice input");
                }
            }
            UiAction::Camera(true) => self.camera_on(),
            UiAction::Camera(false) => {
                self.send(CapabilityId::Camera, Command::Stop);
                self.supervisor.stop(CapabilityId::Camera);
                self.set_camera(false);
            }
            UiAction::Filter(key) => match CameraFilter::parse(&key) {
                Some(filter) => {
                    self.camera_filter = filter;
                    if self.toggles.camera {
                        self.send(
                            CapabilityId::Camera,
                            Command::SetFilter {
                                key: filter.as_str().to_owned(),
                            },
                        );
                    }
                    self.presenter.show_notice(
                        NoticeLevel::Info,
                        &format!("Camera filter set to: {filter}"),
                        Some(FILTER_NOTICE_DURATION),
                    );
                }
                None => {
                    let known: Vec<&str> = CameraFilter::ALL.iter().map(|f| f.as_str()).collect();
                    self.presenter.show_notice(
                        NoticeLevel::Warning,
                        &format!("Unknown filter: {key}. Available: {}", known.join(", ")),
                        None,
                    );
                }
            },
            UiAction::Capture(path) => self.capture(path),
            UiAction::Voice(voice_id) => {
                self.selected_voice = Some(voice_id.clone());
                self.send(CapabilityId::Tts, Command::SetVoice { voice_id });
            }
            UiAction::Rate(rate) => {
                self.send(CapabilityId::Tts, Command::SetRate { rate });
            }
            UiAction::Volume(volume) => {
                self.send(CapabilityId::Tts, Command::SetVolume { volume });
            }
            UiAction::Mute => {
                self.toggles.voice_output = false;
                self.send(CapabilityId::Tts, Command::StopSpeaking);
                self.presenter.show_notice(NoticeLevel::Info, "Voice output off.", None);
            }
            UiAction::Unmute => {
                self.toggles.voice_output = true;
                self.presenter.show_notice(NoticeLevel::Info, "Voice output on.", None);
            }
            UiAction::StopSpeaking => {
                self.send(CapabilityId::Tts, Command::StopSpeaking);
            }
            UiAction::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn camera_on(&mut self) {
        if let Err(e) = self.supervisor.ensure_running(CapabilityId::Camera, &self.config) {
            error!(error = %e, "camera could not start");
            self.presenter.show_notice(
                NoticeLevel::Error,
                &format!("Camera unavailable: {e}"),
                Some(ERROR_NOTICE_DURATION),
            );
            self.set_camera(false);
            return;
        }
        if self.camera_filter != CameraFilter::default() {
            self.send(
                CapabilityId::Camera,
                Command::SetFilter {
                    key: self.camera_filter.as_str().to_owned(),
                },
            );
        }
        self.set_camera(true);
    }

    fn capture(&mut self, path: Option<PathBuf>) {
        let Some(frame) = self.last_frame.clone().filter(|_| self.toggles.camera) else {
            self.presenter.show_notice(
                NoticeLevel::Warning,
                "Camera is off or no frame available.",
                None,
            );
            return;
        };
        let path = path.unwrap_or_else(|| {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            self.config
                .image_save
                .directory
                .join(format!("capture_{stamp}.png"))
        });
        if !self.send(CapabilityId::ImageSave, Command::SaveImage { frame, path }) {
            self.notice_unavailable("Image saving");
        }
    }

    fn notice_unavailable(&mut self, what: &str) {
        self.presenter.show_notice(
            NoticeLevel::Warning,
            &format!("{what} is not available."),
            None,
        );
    }

    /// Route events and user actions until the user quits, the action
    /// stream ends or `cancel` fires; then shut every worker down.
    pub async fn run(mut self, mut actions: mpsc::Receiver<UiAction>, cancel: CancellationToken) -> (ShutdownReport, P) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    info!("shutdown requested");
                    break;
                }
                Some(envelope) = self.events.recv() => self.handle_event(envelope),
                action = actions.recv() => match action {
                    Some(action) => {
                        if self.handle_action(action) == Flow::Quit {
                            break;
                        }
                    }
                    None => {
                        debug!("action stream closed");
                        break;
                    }
                },
            }
        }
        let report = self.shutdown().await;
        (report, self.presenter)
    }

    /// Shut every worker down within the configured bounds, then deliver the
    /// events they emitted on the way out.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        let timeout = self.config.supervisor.shutdown_timeout();
        let grace = self.config.supervisor.terminate_grace();
        let report = self.supervisor.shutdown_all(timeout, grace).await;
        while let Ok(envelope) = self.events.try_recv() {
            self.handle_event(envelope);
        }
        for (capability, outcome) in &report.outcomes {
            debug!(%capability, %outcome, "shutdown outcome");
        }
        report
    }
}
