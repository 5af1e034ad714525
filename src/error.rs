//! Error types for the lookout assistant.

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum AssistantError {
    /// Speech-input (recognition) port error.
    #[error("speech input error: {0}")]
    Input(String),

    /// Speech-output (playback) port error.
    #[error("speech output error: {0}")]
    Output(String),

    /// Scene-understanding query error.
    #[error("query error: {0}")]
    Query(String),

    /// Camera / frame capture error.
    #[error("camera error: {0}")]
    Camera(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, AssistantError>;
