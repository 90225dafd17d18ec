//! The changelog storage collaborator.

use crate::cursor::{CursorOptions, DBCursor};
use crate::error::Result;
use crate::record::Record;
use csnlog_core::{Csn, DomainId, ReplicaId};
use std::sync::Arc;

/// Per-domain append-only logs keyed by CSN.
///
/// Cursors opened here are positioned according to their options and
/// the requested key. A `None` key starts from the oldest record and is
/// only meaningful with `GreaterThanOrEqualToKey`.
pub trait ChangelogStore: Send + Sync {
    type Record: Record;
    type Cursor: DBCursor<Record = Self::Record> + 'static;

    /// Append a record to a domain's log.
    fn append(&self, domain: &DomainId, record: Self::Record) -> Result<()>;

    /// Open a cursor over every record of a domain.
    fn open_cursor(
        &self,
        domain: &DomainId,
        key: Option<&Csn>,
        options: &CursorOptions,
    ) -> Result<Self::Cursor>;

    /// Open a cursor over the records of a domain issued by one replica.
    fn open_replica_cursor(
        &self,
        domain: &DomainId,
        replica_id: ReplicaId,
        key: Option<&Csn>,
        options: &CursorOptions,
    ) -> Result<Self::Cursor>;

    /// Domains with a log, in ascending order.
    fn domains(&self) -> Vec<DomainId>;

    /// Replicas with at least one record in a domain, in ascending order.
    fn replica_ids(&self, domain: &DomainId) -> Vec<ReplicaId>;
}

impl<S: ChangelogStore + ?Sized> ChangelogStore for Arc<S> {
    type Record = S::Record;
    type Cursor = S::Cursor;

    fn append(&self, domain: &DomainId, record: Self::Record) -> Result<()> {
        (**self).append(domain, record)
    }

    fn open_cursor(
        &self,
        domain: &DomainId,
        key: Option<&Csn>,
        options: &CursorOptions,
    ) -> Result<Self::Cursor> {
        (**self).open_cursor(domain, key, options)
    }

    fn open_replica_cursor(
        &self,
        domain: &DomainId,
        replica_id: ReplicaId,
        key: Option<&Csn>,
        options: &CursorOptions,
    ) -> Result<Self::Cursor> {
        (**self).open_replica_cursor(domain, replica_id, key, options)
    }

    fn domains(&self) -> Vec<DomainId> {
        (**self).domains()
    }

    fn replica_ids(&self, domain: &DomainId) -> Vec<ReplicaId> {
        (**self).replica_ids(domain)
    }
}
