//! Records stored in a changelog.

use csnlog_core::Csn;
use serde::{Deserialize, Serialize};

/// A changelog record, keyed by the CSN of the change it carries.
pub trait Record: Clone + Send + Sync + 'static {
    fn csn(&self) -> Csn;
}

/// A replicated change: its CSN and an opaque encoded payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub csn: Csn,
    pub payload: Vec<u8>,
}

impl ChangeRecord {
    pub fn new(csn: Csn, payload: impl Into<Vec<u8>>) -> Self {
        ChangeRecord {
            csn,
            payload: payload.into(),
        }
    }

    /// The payload as UTF-8, if it is valid UTF-8.
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

impl Record for ChangeRecord {
    fn csn(&self) -> Csn {
        self.csn
    }
}
