//! Integration tests for server state persistence.
//!
//! These tests verify:
//! - A state survives a restart through the file store
//! - Save failures surface to the caller and are retried on the next save
//! - The flusher saves periodically and once more on shutdown

use csnlog_core::{Csn, CsnGenerator, DomainId, ManualClock, ServerState};
use csnlog_state::{
    spawn_state_flusher, FileStateStore, MemoryStateStore, PersistenceConfig,
    PersistentServerState, StateStore, StorageError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Store wrapper that can be switched to fail every write.
mod flaky {
    use super::*;
    use csnlog_core::ReplicaId;

    pub struct FlakyStore {
        pub inner: MemoryStateStore,
        pub failing: AtomicBool,
        pub writes: AtomicUsize,
    }

    impl FlakyStore {
        pub fn new() -> Self {
            FlakyStore {
                inner: MemoryStateStore::new(),
                failing: AtomicBool::new(false),
                writes: AtomicUsize::new(0),
            }
        }
    }

    impl StateStore for FlakyStore {
        fn load(&self, domain: &DomainId, replica_id: ReplicaId) -> csnlog_state::Result<Option<Vec<u8>>> {
            self.inner.load(domain, replica_id)
        }

        fn store(&self, domain: &DomainId, replica_id: ReplicaId, bytes: &[u8]) -> csnlog_state::Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("disk offline".to_string()));
            }
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.inner.store(domain, replica_id, bytes)
        }

        fn remove(&self, domain: &DomainId, replica_id: ReplicaId) -> csnlog_state::Result<()> {
            self.inner.remove(domain, replica_id)
        }
    }
}

use flaky::FlakyStore;

fn domain() -> DomainId {
    DomainId::new("dc=example,dc=com")
}

#[test]
fn test_generator_survives_restart_through_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let clock = Arc::new(ManualClock::new(10_000));

    let last_issued = {
        let store = FileStateStore::open(dir.path()).unwrap();
        let state = PersistentServerState::new(store, domain(), 1).unwrap();
        let generator = CsnGenerator::with_clock(1, clock.clone());

        let mut last = None;
        for _ in 0..5 {
            let csn = generator.new_csn();
            state.update(&csn);
            last = Some(csn);
        }
        state.save().unwrap();
        last.unwrap()
    };

    // The clock went backward while the replica was down.
    clock.set(5_000);
    let store = FileStateStore::open(dir.path()).unwrap();
    let state = PersistentServerState::new(store, domain(), 1).unwrap();
    assert_eq!(state.max_csn(1), Some(last_issued));

    let generator = CsnGenerator::from_state(1, state.state(), clock);
    assert!(generator.new_csn() > last_issued);
}

#[test]
fn test_failed_save_is_reported_and_retried() {
    let store = Arc::new(FlakyStore::new());
    let state = PersistentServerState::new(store.clone(), domain(), 1).unwrap();
    state.update(&Csn::new(100, 0, 2));

    store.failing.store(true, Ordering::SeqCst);
    let err = state.save().unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
    assert!(state.is_dirty());
    assert_eq!(state.max_csn(2), Some(Csn::new(100, 0, 2)));

    store.failing.store(false, Ordering::SeqCst);
    state.save().unwrap();
    assert!(!state.is_dirty());

    let reloaded = PersistentServerState::new(store.clone(), domain(), 1).unwrap();
    assert_eq!(reloaded.max_csn(2), Some(Csn::new(100, 0, 2)));
}

#[test]
fn test_save_without_changes_does_not_write() {
    let store = Arc::new(FlakyStore::new());
    let state = PersistentServerState::new(store.clone(), domain(), 1).unwrap();

    state.update(&Csn::new(1, 0, 1));
    state.save().unwrap();
    state.save().unwrap();
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);

    // An older CSN is not a change.
    state.update(&Csn::new(0, 0, 1));
    state.save().unwrap();
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_clear_can_keep_an_empty_record() {
    let store = Arc::new(MemoryStateStore::new());
    let config = PersistenceConfig {
        remove_on_clear: false,
        ..PersistenceConfig::default()
    };
    let state = PersistentServerState::with_config(
        store.clone(),
        domain(),
        1,
        ServerState::new(),
        config,
    )
    .unwrap();
    state.update(&Csn::new(1, 0, 1));
    state.save().unwrap();

    state.clear().unwrap();
    assert_eq!(store.load(&domain(), 1).unwrap(), Some(Vec::new()));
    assert!(PersistentServerState::new(store, domain(), 1)
        .unwrap()
        .state()
        .is_empty());
}

#[test]
fn test_zero_save_interval_is_rejected() {
    let config = PersistenceConfig {
        save_interval: Duration::ZERO,
        ..PersistenceConfig::default()
    };
    assert!(matches!(config.validate(), Err(StorageError::InvalidConfig(_))));

    let result = PersistentServerState::with_config(
        Arc::new(MemoryStateStore::new()),
        domain(),
        1,
        ServerState::new(),
        config,
    );
    assert!(matches!(result, Err(StorageError::InvalidConfig(_))));
}

#[tokio::test]
async fn test_aborted_flusher_stops_saving() {
    let store = Arc::new(FlakyStore::new());
    let config = PersistenceConfig {
        save_interval: Duration::from_millis(10),
        ..PersistenceConfig::default()
    };
    let state = Arc::new(
        PersistentServerState::with_config(store.clone(), domain(), 1, ServerState::new(), config)
            .unwrap(),
    );
    let flusher = spawn_state_flusher(state.clone());

    flusher.abort();
    tokio::time::sleep(Duration::from_millis(20)).await;
    let writes = store.writes.load(Ordering::SeqCst);

    state.update(&Csn::new(1, 0, 1));
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(state.is_dirty());
    assert_eq!(store.writes.load(Ordering::SeqCst), writes);

    // Shutting down an aborted flusher skips the final save.
    flusher.shutdown().await;
    assert!(state.is_dirty());
}

#[tokio::test]
async fn test_flusher_saves_periodically_and_on_shutdown() {
    let store = Arc::new(FlakyStore::new());
    let config = PersistenceConfig {
        save_interval: Duration::from_millis(10),
        ..PersistenceConfig::default()
    };
    let state = Arc::new(
        PersistentServerState::with_config(store.clone(), domain(), 1, ServerState::new(), config)
            .unwrap(),
    );
    let flusher = spawn_state_flusher(state.clone());

    state.update(&Csn::new(1, 0, 1));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!state.is_dirty());
    assert_eq!(store.inner.load(&domain(), 1).unwrap().map(|b| b.len()), Some(16));

    store.failing.store(true, Ordering::SeqCst);
    state.update(&Csn::new(2, 0, 1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(state.is_dirty());

    store.failing.store(false, Ordering::SeqCst);
    state.update(&Csn::new(3, 0, 2));
    flusher.shutdown().await;

    assert!(!state.is_dirty());
    let reloaded = PersistentServerState::new(store, domain(), 1).unwrap();
    assert_eq!(reloaded.max_csn(1), Some(Csn::new(2, 0, 1)));
    assert_eq!(reloaded.max_csn(2), Some(Csn::new(3, 0, 2)));
}
