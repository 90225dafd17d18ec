//! Server state bound to durable storage.
//!
//! A `PersistentServerState` is the server state of one replica in one
//! replicated domain. It is loaded from its [`StateStore`] when created
//! and written back by `save()`, either on demand or periodically by the
//! flusher task. Between saves the in-memory state is authoritative; a
//! failed save leaves it untouched and unsaved so the next save retries.

use crate::error::{Result, StorageError};
use crate::store::StateStore;
use csnlog_core::{Csn, DomainId, ReplicaId, ServerState};
use std::time::Duration;
use tracing::{debug, info};

/// Configuration for persistent server states.
#[derive(Clone, Debug)]
pub struct PersistenceConfig {
    /// Interval between two periodic saves.
    pub save_interval: Duration,

    /// Whether `clear()` removes the durable record (instead of storing an
    /// empty state).
    pub remove_on_clear: bool,
}

impl PersistenceConfig {
    /// Check the configuration before it is bound to a state.
    pub fn validate(&self) -> Result<()> {
        if self.save_interval.is_zero() {
            return Err(StorageError::InvalidConfig(
                "save_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        PersistenceConfig {
            save_interval: Duration::from_secs(1),
            remove_on_clear: true,
        }
    }
}

/// A [`ServerState`] persisted under `(domain, replica)`.
pub struct PersistentServerState<S: StateStore> {
    domain: DomainId,
    replica_id: ReplicaId,
    state: ServerState,
    store: S,
    config: PersistenceConfig,
}

impl<S: StateStore> PersistentServerState<S> {
    /// Create a state for `(domain, replica_id)`, loading what the store
    /// holds for it.
    pub fn new(store: S, domain: DomainId, replica_id: ReplicaId) -> Result<Self> {
        Self::with_state(store, domain, replica_id, ServerState::new())
    }

    /// Create from an existing in-memory state. The durable content is
    /// merged into it.
    pub fn with_state(
        store: S,
        domain: DomainId,
        replica_id: ReplicaId,
        state: ServerState,
    ) -> Result<Self> {
        Self::with_config(store, domain, replica_id, state, PersistenceConfig::default())
    }

    /// Create with custom configuration, rejected when it does not
    /// validate.
    pub fn with_config(
        store: S,
        domain: DomainId,
        replica_id: ReplicaId,
        state: ServerState,
        config: PersistenceConfig,
    ) -> Result<Self> {
        config.validate()?;
        let persistent = PersistentServerState {
            domain,
            replica_id,
            state,
            store,
            config,
        };
        persistent.load()?;
        Ok(persistent)
    }

    /// Merge the durable state into memory.
    ///
    /// Returns true if the durable record existed.
    pub fn load(&self) -> Result<bool> {
        let Some(bytes) = self.store.load(&self.domain, self.replica_id)? else {
            debug!(domain = %self.domain, replica_id = self.replica_id, "no durable server state");
            if self.state.is_empty() {
                self.state.set_saved(true);
            }
            return Ok(false);
        };

        let durable = ServerState::from_wire_format(&bytes, 0, bytes.len()).map_err(|source| {
            StorageError::Corrupted {
                domain: self.domain.clone(),
                replica_id: self.replica_id,
                source,
            }
        })?;

        self.state.update_state(&durable);
        if self.state == durable {
            self.state.set_saved(true);
        }
        info!(
            domain = %self.domain,
            replica_id = self.replica_id,
            state = %self.state,
            "loaded server state"
        );
        Ok(true)
    }

    pub fn domain(&self) -> &DomainId {
        &self.domain
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }

    /// The in-memory state.
    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Record a committed CSN.
    ///
    /// Every change with a smaller CSN from the same replica must be
    /// committed before this is called.
    pub fn update(&self, csn: &Csn) -> bool {
        self.state.update(csn)
    }

    pub fn cover(&self, csn: &Csn) -> bool {
        self.state.cover(csn)
    }

    pub fn max_csn(&self, replica_id: ReplicaId) -> Option<Csn> {
        self.state.max_csn(replica_id)
    }

    /// Whether the in-memory state has changes not yet written.
    pub fn is_dirty(&self) -> bool {
        !self.state.is_saved()
    }

    /// Write the in-memory state to the store.
    ///
    /// A state without unsaved changes is not written again. On failure
    /// the state stays unsaved and the error is returned to the caller.
    pub fn save(&self) -> Result<()> {
        if self.state.is_saved() {
            return Ok(());
        }

        // Mark first: an update racing with the write flips the flag back.
        self.state.set_saved(true);
        let bytes = self.state.to_wire_format();
        if let Err(err) = self.store.store(&self.domain, self.replica_id, &bytes) {
            self.state.set_saved(false);
            return Err(err);
        }

        debug!(
            domain = %self.domain,
            replica_id = self.replica_id,
            bytes = bytes.len(),
            "saved server state"
        );
        Ok(())
    }

    /// Erase the in-memory state only; the durable record is kept until
    /// the next save.
    pub fn clear_in_memory(&self) {
        self.state.clear();
    }

    /// Erase both the in-memory and the durable state.
    pub fn clear(&self) -> Result<()> {
        self.state.clear();
        if self.config.remove_on_clear {
            self.store.remove(&self.domain, self.replica_id)?;
        } else {
            self.store.store(&self.domain, self.replica_id, &[])?;
        }
        self.state.set_saved(true);

        info!(domain = %self.domain, replica_id = self.replica_id, "cleared server state");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;
    use std::sync::Arc;

    fn domain() -> DomainId {
        DomainId::new("dc=example,dc=com")
    }

    #[test]
    fn test_starts_empty_without_durable_state() {
        let store = Arc::new(MemoryStateStore::new());
        let state = PersistentServerState::new(store.clone(), domain(), 1).unwrap();

        assert!(state.state().is_empty());
        assert!(store.is_empty());
    }

    #[test]
    fn test_save_and_reload() {
        let store = Arc::new(MemoryStateStore::new());
        let cn1 = Csn::new(10, 0, 1);
        let cn2 = Csn::new(20, 3, 2);

        let state = PersistentServerState::new(store.clone(), domain(), 1).unwrap();
        assert!(state.update(&cn1));
        assert!(state.update(&cn2));
        assert!(state.is_dirty());
        state.save().unwrap();
        assert!(!state.is_dirty());

        let reloaded = PersistentServerState::new(store, domain(), 1).unwrap();
        assert_eq!(reloaded.max_csn(1), Some(cn1));
        assert_eq!(reloaded.max_csn(2), Some(cn2));
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn test_states_are_keyed_by_domain_and_replica() {
        let store = Arc::new(MemoryStateStore::new());
        let other_domain = DomainId::new("o=other");

        let state = PersistentServerState::new(store.clone(), domain(), 1).unwrap();
        state.update(&Csn::new(10, 0, 1));
        state.save().unwrap();

        let other = PersistentServerState::new(store.clone(), other_domain, 1).unwrap();
        assert!(other.state().is_empty());
        let other_replica = PersistentServerState::new(store, domain(), 2).unwrap();
        assert!(other_replica.state().is_empty());
    }

    #[test]
    fn test_with_state_merges_durable_content() {
        let store = Arc::new(MemoryStateStore::new());
        let first = PersistentServerState::new(store.clone(), domain(), 1).unwrap();
        first.update(&Csn::new(50, 0, 1));
        first.save().unwrap();

        let memory = ServerState::from_csns([Csn::new(10, 0, 1), Csn::new(70, 0, 3)]);
        let merged = PersistentServerState::with_state(store, domain(), 1, memory).unwrap();

        assert_eq!(merged.max_csn(1), Some(Csn::new(50, 0, 1)));
        assert_eq!(merged.max_csn(3), Some(Csn::new(70, 0, 3)));
        assert!(merged.is_dirty());
    }

    #[test]
    fn test_clear_erases_durable_state() {
        let store = Arc::new(MemoryStateStore::new());
        let state = PersistentServerState::new(store.clone(), domain(), 1).unwrap();
        state.update(&Csn::new(10, 0, 1));
        state.save().unwrap();

        state.clear().unwrap();
        assert!(state.state().is_empty());
        assert!(store.is_empty());

        let reloaded = PersistentServerState::new(store, domain(), 1).unwrap();
        assert!(reloaded.state().is_empty());
    }

    #[test]
    fn test_clear_in_memory_keeps_durable_state() {
        let store = Arc::new(MemoryStateStore::new());
        let state = PersistentServerState::new(store.clone(), domain(), 1).unwrap();
        state.update(&Csn::new(10, 0, 1));
        state.save().unwrap();

        state.clear_in_memory();
        assert!(state.state().is_empty());
        assert!(state.load().unwrap());
        assert_eq!(state.max_csn(1), Some(Csn::new(10, 0, 1)));
    }

    #[test]
    fn test_corrupted_durable_state_is_reported() {
        let store = Arc::new(MemoryStateStore::new());
        store.store(&domain(), 1, &[1, 2, 3]).unwrap();

        let err = PersistentServerState::new(store, domain(), 1).err().unwrap();
        assert!(matches!(err, StorageError::Corrupted { replica_id: 1, .. }));
    }
}
