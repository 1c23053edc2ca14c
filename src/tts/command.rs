//! Speech through an installed command-line engine.

use super::{TTS_COMMANDS, TTS_EVENTS, Utterance, clamp_rate, clamp_volume, interrupt};
use crate::capability::CapabilityId;
use crate::config::{RobotConfig, TtsConfig};
use crate::error::{Result, RobotError};
use crate::resolver::{ProviderKind, WorkerProvider};
use crate::worker::{Command, Event, Voice, Worker, WorkerContext, unsupported};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, info, warn};

/// Engines tried in order when `tts.command` is unset.
pub const DEFAULT_ENGINES: &[&str] = &["espeak-ng", "espeak", "say"];

/// Command-line conventions of the supported engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineFlavor {
    /// `espeak` / `espeak-ng`: `-s` rate, `-a` amplitude 0–200, `-v` voice.
    Espeak,
    /// macOS `say`: `-r` rate, `-v` voice, no volume flag.
    Say,
}

impl EngineFlavor {
    fn for_program(program: &Path) -> Self {
        match program.file_stem().and_then(|s| s.to_str()) {
            Some("say") => Self::Say,
            _ => Self::Espeak,
        }
    }
}

/// Locate the speech engine binary.
///
/// # Errors
///
/// Returns an error if the configured command (or every default engine) is
/// not on `PATH`.
pub fn locate_engine(config: &TtsConfig) -> Result<PathBuf> {
    if let Some(command) = &config.command {
        return which::which(command)
            .map_err(|e| RobotError::Speech(format!("speech command {command} not found: {e}")));
    }
    DEFAULT_ENGINES
        .iter()
        .find_map(|name| which::which(name).ok())
        .ok_or_else(|| {
            RobotError::Speech(format!(
                "no speech engine found (tried {})",
                DEFAULT_ENGINES.join(", ")
            ))
        })
}

pub struct CommandTtsWorker {
    program: PathBuf,
    flavor: EngineFlavor,
    voice: Option<String>,
    rate: i32,
    volume: u8,
    current: Option<Utterance>,
}

impl CommandTtsWorker {
    pub fn new(program: PathBuf, config: &TtsConfig) -> Self {
        Self {
            flavor: EngineFlavor::for_program(&program),
            program,
            voice: config.voice.clone(),
            rate: clamp_rate(config.rate),
            volume: clamp_volume(config.volume),
            current: None,
        }
    }

    /// Arguments for speaking `text` with the current settings.
    fn speak_args(&self, text: &str) -> Vec<String> {
        let mut args = Vec::new();
        match self.flavor {
            EngineFlavor::Espeak => {
                args.extend(["-s".to_owned(), self.rate.to_string()]);
                args.extend(["-a".to_owned(), (u32::from(self.volume) * 2).to_string()]);
            }
            EngineFlavor::Say => args.extend(["-r".to_owned(), self.rate.to_string()]),
        }
        if let Some(voice) = &self.voice {
            args.extend(["-v".to_owned(), voice.clone()]);
        }
        args.push("--".to_owned());
        args.push(text.to_owned());
        args
    }

    async fn speak(&mut self, text: String, ctx: &WorkerContext) -> Result<()> {
        interrupt(&mut self.current).await;
        let mut child = tokio::process::Command::new(&self.program)
            .args(self.speak_args(&text))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RobotError::Speech(format!("failed to start {}: {e}", self.program.display())))?;

        ctx.emit(Event::SpeechStarted { text: text.clone() });
        let playback = async move {
            match child.wait().await {
                Ok(status) if status.success() => {}
                Ok(status) => warn!(%status, "speech engine exited with failure"),
                Err(e) => warn!(error = %e, "speech engine wait failed"),
            }
        };
        self.current = Some(Utterance::spawn(&ctx.stop_token(), ctx.emitter().clone(), text, playback));
        Ok(())
    }

    async fn list_voices(&self) -> Result<Vec<Voice>> {
        let arg = match self.flavor {
            EngineFlavor::Espeak => ["--voices"],
            EngineFlavor::Say => ["-v?"],
        };
        let output = tokio::process::Command::new(&self.program)
            .args(arg)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RobotError::Speech(format!("failed to list voices: {e}")))?;
        if !output.status.success() {
            return Err(RobotError::Speech(format!(
                "voice listing exited with {}",
                output.status
            )));
        }
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(match self.flavor {
            EngineFlavor::Espeak => parse_espeak_voices(&listing),
            EngineFlavor::Say => parse_say_voices(&listing),
        })
    }
}

/// Parse `espeak --voices` output.
///
/// ```text
/// Pty Language       Age/Gender VoiceName          File                 Other Languages
///  5  af              --/M      Afrikaans          gmw/af
///  2  en-gb           --/M      English_(Great_Britain) gmw/en
/// ```
fn parse_espeak_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let _priority = fields.next()?;
            let language = fields.next()?;
            let age_gender = fields.next()?;
            let name = fields.next()?;
            let gender = match age_gender.rsplit('/').next().unwrap_or(age_gender) {
                "M" => "Male",
                "F" => "Female",
                _ => "Neutral",
            };
            Some(Voice {
                id: language.to_owned(),
                name: name.replace('_', " "),
                language: language.to_owned(),
                gender: gender.to_owned(),
            })
        })
        .collect()
}

/// Parse `say -v?` output: `Name   lang_CC    # sample sentence`.
fn parse_say_voices(listing: &str) -> Vec<Voice> {
    listing
        .lines()
        .filter_map(|line| {
            let head = line.split('#').next()?.trim();
            let (name, language) = head.rsplit_once(char::is_whitespace)?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some(Voice {
                id: name.to_owned(),
                name: name.to_owned(),
                language: language.to_owned(),
                gender: "Neutral".to_owned(),
            })
        })
        .collect()
}

#[async_trait]
impl Worker for CommandTtsWorker {
    fn capability(&self) -> CapabilityId {
        CapabilityId::Tts
    }

    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        match command {
            Command::Speak { text } => self.speak(text, ctx).await?,
            Command::StopSpeaking => interrupt(&mut self.current).await,
            Command::InitializeEngine => {
                let voices = self.list_voices().await?;
                info!(engine = %self.program.display(), voices = voices.len(), "speech engine ready");
                ctx.emit(Event::AvailableVoices { voices });
            }
            Command::SetVoice { voice_id } => {
                debug!(voice = voice_id.as_str(), "voice selected");
                self.voice = Some(voice_id);
            }
            Command::SetRate { rate } => self.rate = clamp_rate(rate),
            Command::SetVolume { volume } => self.volume = clamp_volume(volume),
            other => return Err(unsupported(CapabilityId::Tts, &other)),
        }
        if self.current.as_ref().is_some_and(Utterance::is_finished) {
            self.current = None;
        }
        Ok(())
    }

    async fn shutdown(&mut self, _ctx: &WorkerContext) {
        interrupt(&mut self.current).await;
    }
}

pub struct CommandTtsProvider;

impl WorkerProvider for CommandTtsProvider {
    fn name(&self) -> &str {
        "command-tts"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::Tts
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Real
    }

    fn commands(&self) -> &'static [&'static str] {
        TTS_COMMANDS
    }

    fn events(&self) -> &'static [&'static str] {
        TTS_EVENTS
    }

    fn probe(&self, config: &RobotConfig) -> Result<()> {
        locate_engine(&config.tts).map(|_| ())
    }

    fn build(&self, config: &RobotConfig) -> Result<Box<dyn Worker>> {
        let program = locate_engine(&config.tts)?;
        Ok(Box::new(CommandTtsWorker::new(program, &config.tts)))
    }
}
