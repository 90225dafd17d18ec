//! Identifiers for replicas and replicated domains.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a replica (one independent writer of a domain).
pub type ReplicaId = i32;

/// Identifier of a replicated domain, e.g. one naming context.
///
/// Domains are ordered by their identifier; composite cursors rely on
/// this order to break ties deterministically.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DomainId(pub String);

impl DomainId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DomainId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DomainId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
