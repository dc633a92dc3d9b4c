//! Error types for Tasker

use thiserror::Error;

/// Result type alias for Tasker operations
pub type TaskerResult<T> = Result<T, TaskerError>;

/// Main error type for Tasker
#[derive(Error, Debug)]
pub enum TaskerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl TaskerError {
    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
