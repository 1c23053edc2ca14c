//! Configuration types for the robot runtime.
//!
//! Every capability reads its constructor arguments from one fixed section of
//! [`RobotConfig`]. Missing keys fall back to the section defaults, so a
//! partial (or absent) config file is always valid.

use crate::capability::CapabilityId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Log level and log file settings.
    pub logging: LoggingConfig,
    /// Worker shutdown timing.
    pub supervisor: SupervisorConfig,
    /// Capability resolution overrides.
    pub capabilities: CapabilitiesConfig,
    /// Text-to-speech settings.
    pub tts: TtsConfig,
    /// Speech recognition settings.
    pub stt: SttConfig,
    /// Emotion analysis settings.
    pub emotion: EmotionConfig,
    /// Response generation settings.
    pub nlp: NlpConfig,
    /// Camera capture settings.
    pub camera: CameraConfig,
    /// Snapshot persistence settings.
    pub image_save: ImageSaveConfig,
    /// Routing and UI toggles.
    pub orchestrator: OrchestratorConfig,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset (e.g. "info", "updogo=debug").
    pub level: String,
    /// Also write logs to a daily-rolling file.
    pub file_enabled: bool,
    /// Directory for log files. Defaults to the platform data directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file_enabled: false,
            directory: None,
        }
    }
}

impl LoggingConfig {
    /// Resolved log directory: configured value, else `<data dir>/updogo/logs`.
    pub fn log_directory(&self) -> PathBuf {
        self.directory.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("updogo")
                .join("logs")
        })
    }
}

/// Worker supervisor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long each worker gets to finish after a shutdown request.
    pub shutdown_timeout_ms: u64,
    /// Extra wait after forced termination before giving up on a worker.
    pub terminate_grace_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 2_500,
            terminate_grace_ms: 1_000,
        }
    }
}

impl SupervisorConfig {
    /// Per-worker graceful shutdown timeout.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// Grace period after forced termination.
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

/// Capability resolution overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CapabilitiesConfig {
    /// Capabilities that always use their fallback, without probing.
    pub force_fallback: Vec<CapabilityId>,
}

/// Text-to-speech configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    /// Speech command to run. When unset, `espeak-ng`, `espeak` and `say` are tried in order.
    pub command: Option<String>,
    /// Preferred voice id. The first available voice is used when unset or unknown.
    pub voice: Option<String>,
    /// Speaking rate in words per minute (50–350).
    pub rate: i32,
    /// Volume in percent (0–100).
    pub volume: u8,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            command: None,
            voice: None,
            rate: 160,
            volume: 85,
        }
    }
}

/// Lowest accepted speaking rate.
pub const MIN_SPEECH_RATE: i32 = 50;
/// Highest accepted speaking rate.
pub const MAX_SPEECH_RATE: i32 = 350;

/// Speech recognition configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SttConfig {
    /// Recognizer command. It must print one recognized utterance per stdout line.
    pub command: Option<String>,
    /// Arguments for the recognizer command. `{language}` and `{microphone}` are substituted.
    pub args: Vec<String>,
    /// Recognition language code.
    pub language: String,
    /// Input device index passed to the recognizer.
    pub microphone_index: Option<u32>,
    /// Energy threshold for speech onset.
    pub energy_threshold: u32,
    /// Seconds of silence that end a phrase.
    pub pause_threshold_s: f32,
    /// Longest phrase in seconds.
    pub phrase_time_limit_s: f32,
    /// Delay before the fallback recognizer reports its canned phrase.
    pub simulated_phrase_delay_ms: u64,
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            language: "en-US".to_owned(),
            microphone_index: None,
            energy_threshold: 300,
            pause_threshold_s: 0.8,
            phrase_time_limit_s: 5.0,
            simulated_phrase_delay_ms: 2_500,
        }
    }
}

/// Emotion analysis configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionConfig {
    /// Below this confidence the keyword classifier reports `neutral`.
    pub min_confidence: f32,
}

impl Default for EmotionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.3,
        }
    }
}

/// Response generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NlpConfig {
    /// Base URL of an OpenAI-compatible API (e.g. "http://localhost:11434/v1").
    pub endpoint: Option<String>,
    /// Model name sent with each request.
    pub model: String,
    /// Environment variable holding the API key, if the endpoint needs one.
    pub api_key_env: Option<String>,
    /// System prompt prepended to every conversation.
    pub system_prompt: String,
    /// Request timeout in milliseconds.
    pub timeout_ms: u64,
    /// Number of previous user/assistant turns sent with each request.
    pub history_turns: usize,
}

impl Default for NlpConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            model: "llama3.2".to_owned(),
            api_key_env: None,
            system_prompt: "You are Updog, a friendly desktop robot. Answer in one or two short \
                            sentences. You may start a reply with a tag such as [emotion:happy]."
                .to_owned(),
            timeout_ms: 20_000,
            history_turns: 6,
        }
    }
}

/// Camera capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Capture device index.
    pub index: u32,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Initial filter key (see `camera::CameraFilter`).
    pub filter: String,
    /// Delay between frames in milliseconds.
    pub frame_interval_ms: u64,
    /// Directory of still images replayed as the capture stream.
    pub source: Option<PathBuf>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: 640,
            height: 480,
            filter: "None".to_owned(),
            frame_interval_ms: 30,
            source: None,
        }
    }
}

/// Snapshot persistence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageSaveConfig {
    /// Directory for captured snapshots.
    pub directory: PathBuf,
}

impl Default for ImageSaveConfig {
    fn default() -> Self {
        Self {
            directory: dirs::picture_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("updogo"),
        }
    }
}

/// Orchestrator toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Speak NLP responses aloud.
    pub voice_output: bool,
    /// Start the camera worker together with the others.
    pub camera_autostart: bool,
    /// Start listening right after startup.
    pub listen_on_start: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            voice_output: true,
            camera_autostart: false,
            listen_on_start: false,
        }
    }
}

impl RobotConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::RobotError::Config(e.to_string()))
    }

    /// Load `path` if it exists, otherwise return the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> crate::error::Result<Self> {
        if path.exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::RobotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `<config dir>/updogo/config.toml`.
    pub fn default_config_path() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("updogo").join("config.toml"),
            None => PathBuf::from("/tmp/updogo/config.toml"),
        }
    }

    /// Whether configuration pins `capability` to its fallback.
    pub fn forces_fallback(&self, capability: CapabilityId) -> bool {
        self.capabilities.force_fallback.contains(&capability)
    }
}
