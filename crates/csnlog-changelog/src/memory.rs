//! In-memory changelog store.
//!
//! Each domain is a `BTreeMap` keyed by CSN behind a shared lock, so
//! cursors opened on a domain see records appended after they were
//! opened, including after a `next()` that reported the end of the log.

use crate::cursor::{CursorOptions, DBCursor, KeyMatchingStrategy, PositionStrategy};
use crate::error::{ChangelogError, Result};
use crate::record::Record;
use crate::store::ChangelogStore;
use csnlog_core::{Csn, DomainId, ReplicaId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;
use tracing::trace;

type DomainLog<R> = Arc<RwLock<BTreeMap<Csn, R>>>;

/// Resolve the lower bound a cursor over `log` starts reading from.
///
/// Only keys accepted by `filter` are considered. Returns `Ok(None)` when
/// nothing matches the requested key, in which case the cursor is empty.
/// A `None` key starts from the oldest record and requires
/// `GreaterThanOrEqualToKey`.
pub fn start_bound<R>(
    log: &BTreeMap<Csn, R>,
    key: Option<&Csn>,
    options: &CursorOptions,
    filter: impl Fn(&Csn) -> bool,
) -> Result<Option<Bound<Csn>>> {
    let key = match key {
        Some(key) => *key,
        None => {
            return match options.key_matching {
                KeyMatchingStrategy::GreaterThanOrEqualToKey => Ok(Some(Bound::Unbounded)),
                other => Err(ChangelogError::InvalidCursorOptions(format!(
                    "{:?} requires a starting key",
                    other
                ))),
            };
        }
    };

    let exact = log.contains_key(&key) && filter(&key);
    let matched = match options.key_matching {
        KeyMatchingStrategy::EqualToKey => exact.then_some(key),
        _ if exact => Some(key),
        KeyMatchingStrategy::LessThanOrEqualToKey => {
            log.range(..key).rev().map(|(csn, _)| *csn).find(|csn| filter(csn))
        }
        KeyMatchingStrategy::GreaterThanOrEqualToKey => log
            .range((Bound::Excluded(key), Bound::Unbounded))
            .map(|(csn, _)| *csn)
            .find(|csn| filter(csn)),
    };

    Ok(matched.map(|matched| match options.position {
        PositionStrategy::OnMatchingKey => Bound::Included(matched),
        PositionStrategy::AfterMatchingKey => Bound::Excluded(key),
    }))
}

/// Changelog store keeping every domain log in memory.
pub struct MemoryChangelogStore<R> {
    domains: RwLock<BTreeMap<DomainId, DomainLog<R>>>,
}

impl<R: Record> MemoryChangelogStore<R> {
    pub fn new() -> Self {
        MemoryChangelogStore {
            domains: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of records in a domain.
    pub fn len(&self, domain: &DomainId) -> usize {
        self.log(domain).map(|log| log.read().len()).unwrap_or(0)
    }

    pub fn is_empty(&self, domain: &DomainId) -> bool {
        self.len(domain) == 0
    }

    fn log(&self, domain: &DomainId) -> Option<DomainLog<R>> {
        self.domains.read().get(domain).cloned()
    }

    fn open(
        &self,
        domain: &DomainId,
        replica_id: Option<ReplicaId>,
        key: Option<&Csn>,
        options: &CursorOptions,
    ) -> Result<MemoryCursor<R>> {
        let key = key.or(options.default_csn.as_ref());
        let log = match self.log(domain) {
            Some(log) => log,
            None => {
                // Validate the options even when there is nothing to read.
                start_bound(&BTreeMap::<Csn, R>::new(), key, options, |_| true)?;
                return Ok(MemoryCursor::exhausted(replica_id));
            }
        };

        let bound = {
            let records = log.read();
            start_bound(&records, key, options, |csn| {
                replica_id.map_or(true, |id| csn.replica_id() == id)
            })?
        };
        trace!(domain = %domain, ?replica_id, ?bound, "opened changelog cursor");

        Ok(match bound {
            Some(bound) => MemoryCursor {
                log: Some(log),
                replica_id,
                next_from: bound,
                current: None,
            },
            None => MemoryCursor::exhausted(replica_id),
        })
    }
}

impl<R: Record> Default for MemoryChangelogStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> ChangelogStore for MemoryChangelogStore<R> {
    type Record = R;
    type Cursor = MemoryCursor<R>;

    fn append(&self, domain: &DomainId, record: R) -> Result<()> {
        let log = {
            let mut domains = self.domains.write();
            domains.entry(domain.clone()).or_default().clone()
        };
        let csn = record.csn();
        let mut records = log.write();
        if records.contains_key(&csn) {
            return Err(ChangelogError::DuplicateCsn {
                domain: domain.clone(),
                csn,
            });
        }
        records.insert(csn, record);
        Ok(())
    }

    fn open_cursor(
        &self,
        domain: &DomainId,
        key: Option<&Csn>,
        options: &CursorOptions,
    ) -> Result<MemoryCursor<R>> {
        self.open(domain, None, key, options)
    }

    fn open_replica_cursor(
        &self,
        domain: &DomainId,
        replica_id: ReplicaId,
        key: Option<&Csn>,
        options: &CursorOptions,
    ) -> Result<MemoryCursor<R>> {
        self.open(domain, Some(replica_id), key, options)
    }

    fn domains(&self) -> Vec<DomainId> {
        self.domains.read().keys().cloned().collect()
    }

    fn replica_ids(&self, domain: &DomainId) -> Vec<ReplicaId> {
        let Some(log) = self.log(domain) else {
            return Vec::new();
        };
        let records = log.read();
        let ids: BTreeSet<ReplicaId> = records.keys().map(|csn| csn.replica_id()).collect();
        ids.into_iter().collect()
    }
}

/// Cursor over a [`MemoryChangelogStore`] domain, optionally restricted
/// to the records of one replica.
pub struct MemoryCursor<R> {
    log: Option<DomainLog<R>>,
    replica_id: Option<ReplicaId>,
    next_from: Bound<Csn>,
    current: Option<R>,
}

impl<R> MemoryCursor<R> {
    fn exhausted(replica_id: Option<ReplicaId>) -> Self {
        MemoryCursor {
            log: None,
            replica_id,
            next_from: Bound::Unbounded,
            current: None,
        }
    }

    /// The replica this cursor is restricted to, if any.
    pub fn replica_id(&self) -> Option<ReplicaId> {
        self.replica_id
    }
}

impl<R: Record> DBCursor for MemoryCursor<R> {
    type Record = R;

    fn record(&self) -> Option<&R> {
        self.current.as_ref()
    }

    fn next(&mut self) -> Result<bool> {
        let Some(log) = &self.log else {
            self.current = None;
            return Ok(false);
        };

        let found = {
            let records = log.read();
            records
                .range((self.next_from, Bound::Unbounded))
                .find(|(csn, _)| self.replica_id.map_or(true, |id| csn.replica_id() == id))
                .map(|(csn, record)| (*csn, record.clone()))
        };

        match found {
            Some((csn, record)) => {
                self.next_from = Bound::Excluded(csn);
                self.current = Some(record);
                Ok(true)
            }
            // Stay attached: a later call picks up records appended since.
            None => {
                self.current = None;
                Ok(false)
            }
        }
    }

    fn close(&mut self) {
        self.log = None;
        self.current = None;
    }
}
