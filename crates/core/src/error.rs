//! Decode error model.

use thiserror::Error;

/// Result type used when turning external input into domain values.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Malformed external input (inbound event payload or zone configuration).
///
/// Decode errors are never fatal: callers log them and discard the input or fall
/// back to a default.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// The payload was not valid JSON for the expected shape.
    #[error("malformed json: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload parsed but a field failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Reading the raw input failed (e.g. a configuration file).
    #[error("unreadable input: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
