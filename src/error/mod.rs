//! Worker error types for robust error handling.

use thiserror::Error;

/// Errors surfaced by the workers.
#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Broker error: {0}")]
    Broker(#[from] lapin::Error),

    #[error("Cannot decode event ({reason}): {raw}")]
    Decode { reason: String, raw: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Email error: {0}")]
    Email(String),

    #[error("Ticket error: {0}")]
    Ticket(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl WorkerError {
    /// Build a [`WorkerError::Decode`] keeping a bounded slice of the raw
    /// payload for DLQ inspection.
    pub fn decode(reason: impl std::fmt::Display, raw: &[u8]) -> Self {
        const MAX_RAW: usize = 512;
        let raw = String::from_utf8_lossy(&raw[..raw.len().min(MAX_RAW)]).into_owned();
        WorkerError::Decode {
            reason: reason.to_string(),
            raw,
        }
    }
}

pub type WorkerResult<T> = Result<T, WorkerError>;
