//! Emotion analysis of user text.
//!
//! The real backend is a lightweight keyword classifier: no model, no
//! network, deterministic output.
//!
//! # Priority
//!
//! 1. Explicit `[emotion:X]` tag at the start of the text → confidence 1.0.
//! 2. Keyword heuristic scan → confidence proportional to match count.
//! 3. Nothing matched → `neutral`.
//!
//! The fallback applies a two-rule heuristic so the UI still sees an
//! `emotion_detected` for every `analyze_text`.

use crate::capability::CapabilityId;
use crate::config::{EmotionConfig, RobotConfig};
use crate::error::Result;
use crate::resolver::{ProviderKind, WorkerProvider};
use crate::worker::{Command, Event, Worker, WorkerContext, unsupported};
use async_trait::async_trait;
use tracing::debug;

/// Confidence reported with a `neutral` result.
pub const NEUTRAL_CONFIDENCE: f32 = 0.5;

/// One classification.
#[derive(Debug, Clone, PartialEq)]
pub struct EmotionReading {
    pub emotion: String,
    pub confidence: f32,
}

impl EmotionReading {
    fn neutral() -> Self {
        Self {
            emotion: "neutral".to_owned(),
            confidence: NEUTRAL_CONFIDENCE,
        }
    }
}

/// Emotion → keyword table. Order breaks ties (earlier wins).
const EMOTION_TABLE: &[(&str, &[&str])] = &[
    (
        "happy",
        &[
            "happy", "great", "glad", "awesome", "wonderful", "love", "fantastic", "excited",
            "yay", "thanks", "thank you", "amazing",
        ],
    ),
    (
        "sad",
        &[
            "sad", "bad", "unhappy", "miss", "lonely", "sorry", "cry", "depressed", "tired",
            "upset",
        ],
    ),
    (
        "angry",
        &[
            "angry", "mad", "hate", "annoyed", "furious", "stupid", "annoying", "frustrated",
        ],
    ),
    (
        "surprised",
        &["wow", "whoa", "really?", "no way", "unbelievable", "surprise", "omg"],
    ),
    (
        "fearful",
        &["scared", "afraid", "worried", "nervous", "anxious", "fear", "terrified"],
    ),
    (
        "curious",
        &["why", "how does", "what is", "wonder", "curious", "tell me", "explain"],
    ),
];

/// Classify the emotional tone of `text`.
pub fn classify(text: &str) -> EmotionReading {
    if let Some((_, emotion)) = strip_emotion_tag(text) {
        return EmotionReading {
            emotion,
            confidence: 1.0,
        };
    }

    let lower = text.to_lowercase();
    let mut best_emotion = "neutral";
    let mut best_score = 0usize;
    for &(emotion, keywords) in EMOTION_TABLE {
        let score = keywords.iter().filter(|kw| lower.contains(*kw)).count();
        if score > best_score {
            best_score = score;
            best_emotion = emotion;
        }
    }

    // 1 hit → 0.35, 2 → 0.55, 3 → 0.70, then +0.05 each, capped at 0.90.
    let confidence = match best_score {
        0 => return EmotionReading::neutral(),
        1 => 0.35,
        2 => 0.55,
        3 => 0.70,
        _ => (0.70 + 0.05 * (best_score as f32 - 3.0)).min(0.90),
    };

    EmotionReading {
        emotion: best_emotion.to_owned(),
        confidence,
    }
}

/// Strip an explicit `[emotion:X]` tag from the start of the text, returning
/// the remaining text and the emotion.
///
/// Returns `None` if there is no tag or the emotion is unknown.
pub fn strip_emotion_tag(text: &str) -> Option<(String, String)> {
    const PREFIX: &str = "[emotion:";
    let trimmed = text.trim_start();
    let rest = trimmed.strip_prefix(PREFIX)?;
    let end = rest.find(']')?;
    let emotion = rest[..end].trim().to_lowercase();
    if !is_known_emotion(&emotion) {
        return None;
    }
    Some((rest[end + 1..].trim_start().to_owned(), emotion))
}

fn is_known_emotion(s: &str) -> bool {
    s == "neutral" || EMOTION_TABLE.iter().any(|(e, _)| *e == s)
}

// ── Real backend ─────────────────────────────────────────────────────────

/// Keyword classifier worker.
pub struct KeywordEmotionWorker {
    min_confidence: f32,
}

impl KeywordEmotionWorker {
    pub fn new(config: &EmotionConfig) -> Self {
        Self {
            min_confidence: config.min_confidence,
        }
    }
}

#[async_trait]
impl Worker for KeywordEmotionWorker {
    fn capability(&self) -> CapabilityId {
        CapabilityId::Emotion
    }

    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        let text = match command {
            Command::AnalyzeText { text } => text,
            other => return Err(unsupported(CapabilityId::Emotion, &other)),
        };
        let mut reading = classify(&text);
        if reading.confidence < self.min_confidence {
            reading = EmotionReading::neutral();
        }
        debug!(emotion = reading.emotion.as_str(), confidence = reading.confidence, "emotion classified");
        ctx.emit(Event::EmotionDetected {
            emotion: reading.emotion,
            confidence: reading.confidence,
        });
        Ok(())
    }
}

pub struct KeywordEmotionProvider;

impl WorkerProvider for KeywordEmotionProvider {
    fn name(&self) -> &str {
        "keyword-emotion"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::Emotion
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Real
    }

    fn commands(&self) -> &'static [&'static str] {
        &["analyze_text"]
    }

    fn events(&self) -> &'static [&'static str] {
        &["emotion_detected", "error"]
    }

    fn probe(&self, _config: &RobotConfig) -> Result<()> {
        Ok(())
    }

    fn build(&self, config: &RobotConfig) -> Result<Box<dyn Worker>> {
        Ok(Box::new(KeywordEmotionWorker::new(&config.emotion)))
    }
}

// ── Fallback ─────────────────────────────────────────────────────────────

/// Two-rule heuristic used when the classifier is unavailable.
pub fn simple_reading(text: &str) -> EmotionReading {
    let lower = text.to_lowercase();
    if lower.contains("happy") || lower.contains("great") {
        EmotionReading {
            emotion: "happy".to_owned(),
            confidence: 0.75,
        }
    } else if lower.contains("sad") || lower.contains("bad") {
        EmotionReading {
            emotion: "sad".to_owned(),
            confidence: 0.70,
        }
    } else {
        EmotionReading::neutral()
    }
}

pub struct SimpleEmotionWorker;

#[async_trait]
impl Worker for SimpleEmotionWorker {
    fn capability(&self) -> CapabilityId {
        CapabilityId::Emotion
    }

    async fn handle(&mut self, command: Command, ctx: &WorkerContext) -> Result<()> {
        let text = match command {
            Command::AnalyzeText { text } => text,
            other => return Err(unsupported(CapabilityId::Emotion, &other)),
        };
        debug!(text = text.as_str(), "fallback call: analyze_text");
        let reading = simple_reading(&text);
        ctx.emit(Event::EmotionDetected {
            emotion: reading.emotion,
            confidence: reading.confidence,
        });
        Ok(())
    }
}

pub struct SimpleEmotionProvider;

impl WorkerProvider for SimpleEmotionProvider {
    fn name(&self) -> &str {
        "simple-emotion"
    }

    fn capability(&self) -> CapabilityId {
        CapabilityId::Emotion
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Fallback
    }

    fn commands(&self) -> &'static [&'static str] {
        &["analyze_text"]
    }

    fn events(&self) -> &'static [&'static str] {
        &["emotion_detected", "error"]
    }

    fn probe(&self, _config: &RobotConfig) -> Result<()> {
        Ok(())
    }

    fn build(&self, _config: &RobotConfig) -> Result<Box<dyn Worker>> {
        Ok(Box::new(SimpleEmotionWorker))
    }
}
