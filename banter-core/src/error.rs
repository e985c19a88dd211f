//! Error types for the BANTER core library.

use thiserror::Error;

/// Top-level error type for all BANTER core operations.
#[derive(Error, Debug)]
pub enum BanterError {
    /// Configuration could not be parsed or is inconsistent.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The personality definition document is unreadable or malformed.
    #[error("Personality file error: {0}")]
    PersonalityFile(String),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for BanterError {
    fn from(err: serde_json::Error) -> Self {
        BanterError::Serialization(err.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, BanterError>;
