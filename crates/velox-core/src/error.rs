//! Error types for the velox download engine.

use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur in the engine.
#[derive(Debug, Error)]
pub enum VeloxError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Task was paused")]
    Paused,

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl VeloxError {
    /// Whether a failed attempt of this kind is worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            VeloxError::Network(_) => true,
            VeloxError::ServerError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<VeloxError> for String {
    fn from(error: VeloxError) -> Self {
        error.to_string()
    }
}
