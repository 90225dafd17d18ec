//! A single CSN-ordered stream over every replicated domain.

use crate::composite::{CompositeDBCursor, RemovalHandle};
use crate::cursor::{CursorOptions, DBCursor};
use crate::domain::{open_domain_cursor, DomainDBCursor};
use crate::error::Result;
use crate::store::ChangelogStore;
use csnlog_core::{DomainId, ServerState};
use std::sync::Arc;
use tracing::info;

/// Merges one [`DomainDBCursor`] per domain into a single stream.
///
/// Records are exposed in ascending CSN order across all domains; equal
/// CSNs in two domains are exposed in domain order. Domains can be added
/// at any time and removed lazily, see [`CompositeDBCursor`].
pub struct MultiDomainDBCursor<S: ChangelogStore> {
    store: Arc<S>,
    options: CursorOptions,
    cursor: CompositeDBCursor<DomainId, DomainDBCursor<S::Cursor>>,
}

impl<S: ChangelogStore> MultiDomainDBCursor<S> {
    /// Create a new cursor with no domains. `options` position the
    /// replica cursors of every domain added through [`Self::add_domain`].
    pub fn new(store: Arc<S>, options: CursorOptions) -> Self {
        MultiDomainDBCursor {
            store,
            options,
            cursor: CompositeDBCursor::new(),
        }
    }

    /// Open `domain` from `start_state` and fold it into the stream.
    pub fn add_domain(&mut self, domain: DomainId, start_state: &ServerState) -> Result<()> {
        let domain_cursor = open_domain_cursor(&*self.store, &domain, start_state, &self.options)?;
        info!(domain = %domain, "added domain to multi-domain cursor");
        self.cursor.add_cursor(domain, domain_cursor);
        Ok(())
    }

    /// Fold an already opened domain cursor into the stream.
    pub fn add_domain_cursor(&mut self, domain: DomainId, cursor: DomainDBCursor<S::Cursor>) {
        self.cursor.add_cursor(domain, cursor);
    }

    /// Flag `domain` for removal at the next `next()`.
    pub fn remove_domain(&self, domain: &DomainId) {
        self.cursor.remove_cursor(domain.clone());
    }

    pub fn removal_handle(&self) -> RemovalHandle<DomainId> {
        self.cursor.removal_handle()
    }

    /// The domain of the current record.
    pub fn domain(&self) -> Option<&DomainId> {
        self.cursor.current_key()
    }

    /// Domains currently merged, including exhausted ones.
    pub fn domains(&self) -> Vec<DomainId> {
        self.cursor.keys()
    }

    pub fn contains_domain(&self, domain: &DomainId) -> bool {
        self.cursor.contains(domain)
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn options(&self) -> &CursorOptions {
        &self.options
    }
}

impl<S: ChangelogStore> DBCursor for MultiDomainDBCursor<S> {
    type Record = S::Record;

    fn record(&self) -> Option<&S::Record> {
        self.cursor.record()
    }

    fn next(&mut self) -> Result<bool> {
        self.cursor.next()
    }

    fn close(&mut self) {
        self.cursor.close();
    }
}
