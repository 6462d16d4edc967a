//! Error types for the relay node

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Malformed envelope: {0}")]
    MalformedEnvelope(String),
    #[error("Payload is not valid base64: {0}")]
    PayloadEncoding(#[from] base64::DecodeError),
    #[error("Payload is not valid UTF-8: {0}")]
    PayloadUtf8(#[from] std::string::FromUtf8Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("Network error: {0}")]
    NetworkError(String),
}

impl From<rusqlite::Error> for RelayError {
    fn from(err: rusqlite::Error) -> Self {
        RelayError::DatabaseError(err.to_string())
    }
}

impl From<toml::de::Error> for RelayError {
    fn from(err: toml::de::Error) -> Self {
        RelayError::ConfigError(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, RelayError>;
