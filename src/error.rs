//! Error types for the updogo runtime.

/// Top-level error type for capability resolution and worker supervision.
#[derive(Debug, thiserror::Error)]
pub enum RobotError {
    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Capability registration or resolution error.
    #[error("resolution error: {0}")]
    Resolution(String),

    /// Worker construction error.
    #[error("setup error: {0}")]
    Setup(String),

    /// Worker runtime error (command handler or loop failure).
    #[error("worker error: {0}")]
    Worker(String),

    /// Capture device error.
    #[error("device error: {0}")]
    Device(String),

    /// Speech synthesis error.
    #[error("speech error: {0}")]
    Speech(String),

    /// Speech recognition error.
    #[error("recognition error: {0}")]
    Recognition(String),

    /// Natural-language backend error.
    #[error("NLP error: {0}")]
    Nlp(String),

    /// Image encode/decode error.
    #[error("image error: {0}")]
    Image(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<image::ImageError> for RobotError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e.to_string())
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, RobotError>;

/// Render a caught panic payload for logs and error events.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}
