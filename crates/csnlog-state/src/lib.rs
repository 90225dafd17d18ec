//! # csnlog-state
//!
//! Durable server state for replicated domains.
//!
//! This crate provides:
//! - `StateStore`: the key-value collaborator the state is persisted into
//! - `MemoryStateStore` and `FileStateStore` implementations
//! - `PersistentServerState`: a `ServerState` bound to `(domain, replica)`
//!   that is loaded at startup and saved on demand
//! - `spawn_state_flusher`: a background task saving the state periodically
//!
//! ## Example
//!
//! ```rust
//! use csnlog_core::{Csn, DomainId};
//! use csnlog_state::{MemoryStateStore, PersistentServerState};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStateStore::new());
//! let domain = DomainId::new("dc=example,dc=com");
//!
//! let state = PersistentServerState::new(store.clone(), domain.clone(), 1).unwrap();
//! state.update(&Csn::new(1_000, 0, 2));
//! state.save().unwrap();
//!
//! let reloaded = PersistentServerState::new(store, domain, 1).unwrap();
//! assert_eq!(reloaded.max_csn(2), Some(Csn::new(1_000, 0, 2)));
//! ```

mod error;
mod file_store;
mod flusher;
mod persistent;
mod store;

pub use error::{Result, StorageError};
pub use file_store::FileStateStore;
pub use flusher::{spawn_state_flusher, FlusherHandle};
pub use persistent::{PersistenceConfig, PersistentServerState};
pub use store::{MemoryStateStore, StateStore};
