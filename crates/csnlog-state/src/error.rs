//! Error types for server state persistence.

use csnlog_core::{DecodeError, DomainId, ReplicaId};
use thiserror::Error;

/// Errors raised while loading or saving a server state.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Corrupted server state for {domain}/{replica_id}: {source}")]
    Corrupted {
        domain: DomainId,
        replica_id: ReplicaId,
        #[source]
        source: DecodeError,
    },

    #[error("State store unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
