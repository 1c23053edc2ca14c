//! Recognition through an external recognizer process.
//!
//! The configured command is started on `start_listening` and killed on
//! `stop_listening`. Every non-blank stdout line is one recognized utterance,
//! optionally prefixed with `<confidence>\t`.

use super::{STT_COMMANDS, STT_EVENTS, parse_recognition};
use crate::capability::CapabilityId;
use crate::config::{RobotConfig, SttConfig};
use crate::error::{Result, RobotError};
use crate::resolver::{ProviderKind, WorkerProvider};
use crate::worker::{Command, Event, EventEmitter, Worker, WorkerContext, unsupported};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Resolve the configured recognizer program.
///
/// # Errors
///
/// Returns an error if `stt.command` is unset or not on `PATH`.
pub fn locate_recognizer(config: &SttConfig) -> Result<PathBuf> {
    let command = config
        .command
        .as_deref()
        .ok_or_else(|| RobotError::Recognition("no recognizer command configured".to_owned()))?;
    which::which(command)
        .map_err(|e| RobotError::Recognition(format!("recognizer {command} not found: {e}")))
}

/// Substitute `{language}` and `{microphone}` in the configured arguments.
fn expand_args(args: &[String], language: &str, microphone: Option<u32>) -> Vec<String> {
    let microphone = microphone.map_or_else(|| "default".to_owned(), |index| index.to_string());
    args.iter()
        .map(|arg| {
            arg.replace("{language}", language)
                .replace("{microphone}", &microphone)
        })
        .collect()
}

struct Session {
    cancel: CancellationToken,
    /// Resolves to `true` when the session reported the recognizer's exit itself.
    task: JoinHandle<bool>,
}

pub struct CommandSttWorker {
    program: PathBuf,
    args: Vec<String>,
    language: String,
    microphone: Option<u32>,
    session: Option<Session>,
}

impl CommandSttWorker {
    pub fn new(program: PathBuf, config: &SttConfig) -> Self {
        Self {
            program,
            args: config.args.clone(),
            language: config.language.clone(),
            microphone: config.microphone_index,
            session: None,
        }
    }

    /// Whether a recognizer session is active.
    pub fn is_listening(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.task.is_finished())
    }

    fn start_listening(&mut self, ctx: &WorkerContext) {
        if self.is_listening() {
            return;
        }
        self.session = None;

        let args = expand_args(&self.args, &self.language, self.microphone);
        let spawned = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.program.display(), error = %e, "recognizer failed to start");
                ctx.emit(Event::ListeningError {
                    kind: "spawn_failed".to_owned(),
                    message: format!("failed to start {}: {e}", self.program.display()),
                });
                return;
            }
        };
        let Some(stdout) = child.stdout.take() else {
            ctx.emit(Event::ListeningError {
                kind: "spawn_failed".to_owned(),
                message: "recognizer stdout unavailable".to_owned(),
            });
            return;
        };

        info!(program = %self.program.display(), language = self.language.as_str(), "listening");
        ctx.emit(Event::ListeningStarted);

        let cancel = ctx.stop_token().child_token();
        let guard = cancel.clone();
        let emitter = ctx.emitter().clone();
        let task = tokio::spawn(async move {
            let mut lines = LinesStream::new(BufReader::new(stdout).lines());
            loop {
                tokio::select! {
                    () = guard.cancelled() => return false,
                    line = lines.next() => match line {
                        Some(Ok(line)) => forward_line(&emitter, &line),
                        Some(Err(e)) => {
                            warn!(error = %e, "recognizer output unreadable");
                            break;
                        }
                        None => break,
                    },
                }
            }
            let status = child.wait().await;
            debug!(?status, "recognizer exited");
            emitter.emit(Event::ListeningError {
                kind: "process_exited".to_owned(),
                message: match status {
                    Ok(status) => format!("recognizer exited with {status}"),
                    Err(e) => format!("recognizer wait failed: {e}"),
                },
            });
            emitter.emit(Event::ListeningStopped);
            true
        });
        self.session = Some(Session { cancel, task });
    }

    async fn stop_listening(&mut self, ctx: &WorkerContext) {
        let Some(session) = self.session.take() else {
            return;
        };
        session.cancel.cancel();
        let reported = match session.task.await {
            Ok(reported) => reported,
            Err(e) => {
                debug!(error = %e, "recognizer session ended abnormally");
                false
            }
        };
        if reported {
            return;
        }
        ctx.emit(Event::VadStatus {
            speech_detected: false,
        });
        ctx.emit(Event::ListeningStopped);
    }
}

fn forward_line(emitter: &EventEmitter, line: &str) {
    if let Some((text, confidence)) = parse_recognition(line) {
        emitter.emit(Event::TextRecognized { text, confidence });
    }
}

#[async_trait]
impl Worker for CommandSttWorker {
    fn capability(&self) -> CapabilityId {
        CapabilityId::Stt
    }

    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        match command {
            Command::StartListening => self.start_listening(ctx),
            Command::StopListening => self.stop_listening(ctx).await,
            Command::SetLanguage { code } => {
                debug!(language = code.as_str(), "language applies from next session");
                self.language = code;
            }
            Command::InitializeMicrophone => {
                if !self.program.exists() {
                    return Err(RobotError::Recognition(format!(
                        "recognizer {} disappeared",
                        self.program.display()
                    )));
                }
                info!(microphone = ?self.microphone, "microphone ready");
            }
            other => return Err(unsupported(CapabilityId::Stt, &other)),
        }
        Ok(())
    }

    async fn shutdown(&mut self, ctx: &WorkerContext) {
        self.stop_listening(ctx).await;
    }
}

pub struct CommandSttProvider;

impl WorkerProvider for CommandSttProvider {
    fn name(&self) -> &str {
        "command-stt"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::Stt
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Real
    }

    fn commands(&self) -> &'static [&'static str] {
        STT_COMMANDS
    }

    fn events(&self) -> &'static [&'static str] {
        STT_EVENTS
    }

    fn probe(&self, config: &RobotConfig) -> Result<()> {
        locate_recognizer(&config.stt).map(|_| ())
    }

    fn build(&self, config: &RobotConfig) -> Result<Box<dyn Worker>> {
        let program = locate_recognizer(&config.stt)?;
        Ok(Box::new(CommandSttWorker::new(program, &config.stt)))
    }
}
