//! Key-value storage for encoded server states.

use crate::error::Result;
use csnlog_core::{DomainId, ReplicaId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Durable storage for server states, keyed by `(domain, replica)`.
///
/// Values are the server state wire format; the store does not interpret
/// them.
pub trait StateStore: Send + Sync {
    /// Load the stored bytes, or `None` if nothing was stored yet.
    fn load(&self, domain: &DomainId, replica_id: ReplicaId) -> Result<Option<Vec<u8>>>;

    /// Store bytes, replacing any previous value.
    fn store(&self, domain: &DomainId, replica_id: ReplicaId, bytes: &[u8]) -> Result<()>;

    /// Erase the stored value. Erasing a missing value is not an error.
    fn remove(&self, domain: &DomainId, replica_id: ReplicaId) -> Result<()>;
}

impl<S: StateStore + ?Sized> StateStore for Arc<S> {
    fn load(&self, domain: &DomainId, replica_id: ReplicaId) -> Result<Option<Vec<u8>>> {
        (**self).load(domain, replica_id)
    }

    fn store(&self, domain: &DomainId, replica_id: ReplicaId, bytes: &[u8]) -> Result<()> {
        (**self).store(domain, replica_id, bytes)
    }

    fn remove(&self, domain: &DomainId, replica_id: ReplicaId) -> Result<()> {
        (**self).remove(domain, replica_id)
    }
}

/// In-memory implementation of StateStore.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    values: RwLock<HashMap<(DomainId, ReplicaId), Vec<u8>>>,
}

impl MemoryStateStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        MemoryStateStore {
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored states.
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self, domain: &DomainId, replica_id: ReplicaId) -> Result<Option<Vec<u8>>> {
        Ok(self
            .values
            .read()
            .get(&(domain.clone(), replica_id))
            .cloned())
    }

    fn store(&self, domain: &DomainId, replica_id: ReplicaId, bytes: &[u8]) -> Result<()> {
        self.values
            .write()
            .insert((domain.clone(), replica_id), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, domain: &DomainId, replica_id: ReplicaId) -> Result<()> {
        self.values.write().remove(&(domain.clone(), replica_id));
        Ok(())
    }
}
