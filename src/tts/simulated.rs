//! Timer-driven speech stand-in.
//!
//! `speak(text)` emits `speech_started(text)` immediately, a word boundary
//! for word `i` at `i * 200 + 100` ms and `speech_finished(text)` at
//! `words * 200 + 200` ms, so busy/idle UI state behaves as with a real engine.

use super::{TTS_COMMANDS, TTS_EVENTS, Utterance, clamp_rate, clamp_volume, interrupt, word_positions};
use crate::capability::CapabilityId;
use crate::config::{RobotConfig, TtsConfig};
use crate::error::Result;
use crate::resolver::{ProviderKind, WorkerProvider};
use crate::worker::{Command, Event, Voice, Worker, WorkerContext, unsupported};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, warn};

/// Pace of simulated speech.
pub const WORD_INTERVAL: Duration = Duration::from_millis(200);

/// Id of the only simulated voice.
pub const SIMULATED_VOICE_ID: &str = "dummy_voice_en";

fn simulated_voice() -> Voice {
    Voice {
        id: SIMULATED_VOICE_ID.to_owned(),
        name: "Fallback English Voice".to_owned(),
        language: "en_US".to_owned(),
        gender: "Neutral".to_owned(),
    }
}

pub struct SimulatedTtsWorker {
    word_interval: Duration,
    rate: i32,
    volume: u8,
    current: Option<Utterance>,
}

impl SimulatedTtsWorker {
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            word_interval: WORD_INTERVAL,
            rate: clamp_rate(config.rate),
            volume: clamp_volume(config.volume),
            current: None,
        }
    }

    /// Override the simulated pace.
    #[must_use]
    pub fn with_word_interval(mut self, interval: Duration) -> Self {
        self.word_interval = interval;
        self
    }

    async fn speak(&mut self, text: String, ctx: &WorkerContext) {
        interrupt(&mut self.current).await;
        debug!(rate = self.rate, volume = self.volume, words = text.split_whitespace().count(), "simulating utterance");
        ctx.emit(Event::SpeechStarted { text: text.clone() });

        let interval = self.word_interval;
        let half = interval / 2;
        let emitter = ctx.emitter().clone();
        let boundaries: Vec<(usize, String)> = word_positions(&text)
            .into_iter()
            .map(|(position, word)| (position, word.to_owned()))
            .collect();
        let start = Instant::now();
        let playback = async move {
            let count = boundaries.len() as u32;
            for (i, (position, word)) in boundaries.into_iter().enumerate() {
                sleep_until(start + interval * i as u32 + half).await;
                let length = word.len();
                emitter.emit(Event::SpeechWordBoundary {
                    word,
                    position,
                    length,
                });
            }
            sleep_until(start + interval * count + interval).await;
        };
        self.current = Some(Utterance::spawn(&ctx.stop_token(), ctx.emitter().clone(), text, playback));
    }
}

#[async_trait]
impl Worker for SimulatedTtsWorker {
    fn capability(&self) -> CapabilityId {
        CapabilityId::Tts
    }

    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        debug!(command = command.name(), "fallback call");
        match command {
            Command::Speak { text } => self.speak(text, ctx).await,
            Command::StopSpeaking => interrupt(&mut self.current).await,
            Command::InitializeEngine => {
                ctx.emit(Event::AvailableVoices {
                    voices: vec![simulated_voice()],
                });
            }
            Command::SetVoice { voice_id } => {
                if voice_id != SIMULATED_VOICE_ID {
                    warn!(voice = voice_id.as_str(), "unknown voice ignored");
                }
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

pub struct SimulatedTtsProvider;

impl WorkerProvider for SimulatedTtsProvider {
    fn name(&self) -> &str {
        "simulated-tts"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::Tts
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Fallback
    }

    fn commands(&self) -> &'static [&'static str] {
        TTS_COMMANDS
    }

    fn events(&self) -> &'static [&'static str] {
        TTS_EVENTS
    }

    fn probe(&self, _config: &RobotConfig) -> Result<()> {
        Ok(())
    }

    fn build(&self, config: &RobotConfig) -> Result<Box<dyn Worker>> {
        Ok(Box::new(SimulatedTtsWorker::new(&config.tts)))
    }
}
