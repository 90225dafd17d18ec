//! Error types for changelog access.

use csnlog_core::{Csn, DecodeError, DomainId};
use thiserror::Error;

/// Errors raised by changelog stores and cursors.
///
/// End of data is never an error: exhausted cursors return `Ok(false)`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChangelogError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Corrupted changelog for {domain}: {reason}")]
    Corrupted { domain: DomainId, reason: String },

    #[error("Duplicate CSN {csn} in {domain}")]
    DuplicateCsn { domain: DomainId, csn: Csn },

    #[error("Invalid cursor options: {0}")]
    InvalidCursorOptions(String),

    #[error("Cursor is not positioned on a record")]
    NotPositioned,

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl From<std::io::Error> for ChangelogError {
    fn from(err: std::io::Error) -> Self {
        ChangelogError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChangelogError>;
