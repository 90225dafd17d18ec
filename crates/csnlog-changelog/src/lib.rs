//! # csnlog-changelog
//!
//! Cursors over CSN-ordered changelogs.
//!
//! This crate provides:
//! - `DBCursor`: the single-owner cursor contract, positioned at creation
//!   by a key matching strategy and a position strategy
//! - `ChangelogStore`: the per-domain append log collaborator, with an
//!   in-memory implementation
//! - `CompositeDBCursor`: a merge cursor over keyed sub-cursors supporting
//!   live add and lazy removal
//! - `DomainDBCursor`: one domain, merged from one cursor per replica and
//!   started from a `ServerState`
//! - `MultiDomainDBCursor`: every domain merged into one CSN-ordered stream
//! - `EclMultiDomainDBCursor`: the multi-domain stream restricted to the
//!   domains enabled for the external changelog
//!
//! ## Example
//!
//! ```rust
//! use csnlog_changelog::{
//!     ChangeRecord, ChangelogStore, CursorOptions, DBCursor, MemoryChangelogStore,
//!     MultiDomainDBCursor,
//! };
//! use csnlog_core::{Csn, DomainId, ServerState};
//! use std::sync::Arc;
//!
//! let store: Arc<MemoryChangelogStore<ChangeRecord>> = Arc::new(MemoryChangelogStore::new());
//! let (a, b) = (DomainId::new("o=a"), DomainId::new("o=b"));
//! store.append(&a, ChangeRecord::new(Csn::new(100, 0, 1), "a1")).unwrap();
//! store.append(&b, ChangeRecord::new(Csn::new(200, 0, 2), "b1")).unwrap();
//!
//! let mut cursor = MultiDomainDBCursor::new(store, CursorOptions::default());
//! cursor.add_domain(a.clone(), &ServerState::new()).unwrap();
//! cursor.add_domain(b, &ServerState::new()).unwrap();
//!
//! assert!(cursor.next().unwrap());
//! assert_eq!(cursor.domain(), Some(&a));
//! cursor.close();
//! ```

mod composite;
mod cursor;
mod domain;
mod ecl;
mod error;
mod memory;
mod multi_domain;
mod record;
mod store;

pub use composite::{CompositeDBCursor, RemovalHandle};
pub use cursor::{CursorOptions, DBCursor, EmptyCursor, KeyMatchingStrategy, PositionStrategy};
pub use domain::{open_domain_cursor, DomainDBCursor};
pub use ecl::{EclEnabledDomainPredicate, EclEnabledDomains, EclMultiDomainDBCursor};
pub use error::{ChangelogError, Result};
pub use memory::{start_bound, MemoryChangelogStore, MemoryCursor};
pub use multi_domain::MultiDomainDBCursor;
pub use record::{ChangeRecord, Record};
pub use store::ChangelogStore;
