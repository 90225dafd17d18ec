//! Merging keyed sub-cursors into one CSN-ordered cursor.
//!
//! Every sub-cursor is in one of three states:
//!
//! - **Pending**: must be advanced before the next merge step
//! - **Positioned**: exposes a record competing for the next merge step
//! - **Exhausted**: returned `false` the last time it was polled
//!
//! `next()` moves the slot that produced the current record back to
//! pending, advances every pending and exhausted slot, then exposes the
//! smallest record. Polling exhausted slots again lets a tailing reader
//! see records appended to a sub-cursor after it reached its end.
//! Removals requested through a [`RemovalHandle`] are applied at the start
//! of the following `next()`, so a record already exposed is never
//! retracted.

use crate::cursor::DBCursor;
use crate::error::Result;
use crate::record::Record;
use csnlog_core::Csn;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Debug;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Pending,
    Positioned,
    Exhausted,
}

struct Slot<C> {
    cursor: C,
    state: SlotState,
}

/// Requests removal of sub-cursors from another owner or thread.
///
/// A request is observed by the next call to `next()` on the cursor the
/// handle was taken from. Requesting removal of an unknown key is a no-op.
pub struct RemovalHandle<K> {
    pending: Arc<Mutex<BTreeSet<K>>>,
}

impl<K> Clone for RemovalHandle<K> {
    fn clone(&self) -> Self {
        RemovalHandle {
            pending: Arc::clone(&self.pending),
        }
    }
}

impl<K: Ord> RemovalHandle<K> {
    fn new() -> Self {
        RemovalHandle {
            pending: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    /// Flag `key` for removal at the next `next()`.
    pub fn remove(&self, key: K) {
        self.pending.lock().insert(key);
    }

    fn cancel(&self, key: &K) {
        self.pending.lock().remove(key);
    }

    fn drain(&self) -> BTreeSet<K> {
        std::mem::take(&mut *self.pending.lock())
    }
}

/// A cursor merging sub-cursors identified by keys of type `K`.
///
/// Records with equal CSNs from different sub-cursors are exposed in key
/// order.
pub struct CompositeDBCursor<K, C> {
    slots: BTreeMap<K, Slot<C>>,
    current: Option<K>,
    removals: RemovalHandle<K>,
    closed: bool,
}

impl<K, C> CompositeDBCursor<K, C>
where
    K: Ord + Clone + Debug + Send,
    C: DBCursor,
    C::Record: Record,
{
    /// Create a new composite cursor with no sub-cursors.
    pub fn new() -> Self {
        CompositeDBCursor {
            slots: BTreeMap::new(),
            current: None,
            removals: RemovalHandle::new(),
            closed: false,
        }
    }

    /// Add a sub-cursor. Its first record competes in the next merge step.
    ///
    /// A sub-cursor already registered under `key` is closed and replaced,
    /// and a pending removal of `key` is cancelled. On a closed composite
    /// the cursor is closed immediately.
    pub fn add_cursor(&mut self, key: K, mut cursor: C) {
        if self.closed {
            warn!(key = ?key, "cursor added to a closed composite cursor");
            cursor.close();
            return;
        }
        self.removals.cancel(&key);
        let slot = Slot {
            cursor,
            state: SlotState::Pending,
        };
        if let Some(mut previous) = self.slots.insert(key.clone(), slot) {
            debug!(key = ?key, "replacing sub-cursor");
            previous.cursor.close();
            if self.current.as_ref() == Some(&key) {
                self.current = None;
            }
        }
    }

    /// Flag a sub-cursor for removal at the next `next()`.
    pub fn remove_cursor(&self, key: K) {
        self.removals.remove(key);
    }

    /// A handle for requesting removals from elsewhere.
    pub fn removal_handle(&self) -> RemovalHandle<K> {
        self.removals.clone()
    }

    /// The key of the sub-cursor that produced the current record.
    pub fn current_key(&self) -> Option<&K> {
        self.record().and(self.current.as_ref())
    }

    /// Keys of the registered sub-cursors, including exhausted ones.
    pub fn keys(&self) -> Vec<K> {
        self.slots.keys().cloned().collect()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn apply_removals(&mut self) {
        for key in self.removals.drain() {
            if let Some(mut slot) = self.slots.remove(&key) {
                debug!(key = ?key, "removed sub-cursor");
                slot.cursor.close();
            }
            if self.current.as_ref() == Some(&key) {
                self.current = None;
            }
        }
    }

    fn select_min(&self) -> Option<K> {
        let mut best: Option<(&K, Csn)> = None;
        for (key, slot) in &self.slots {
            if slot.state != SlotState::Positioned {
                continue;
            }
            let Some(record) = slot.cursor.record() else {
                continue;
            };
            let csn = record.csn();
            match best {
                None => best = Some((key, csn)),
                Some((_, best_csn)) if csn < best_csn => best = Some((key, csn)),
                Some((best_key, best_csn)) if csn == best_csn => {
                    warn!(
                        csn = %csn,
                        kept = ?best_key,
                        deferred = ?key,
                        "equal CSNs in two sub-cursors"
                    );
                }
                Some(_) => {}
            }
        }
        best.map(|(key, _)| key.clone())
    }
}

impl<K, C> Default for CompositeDBCursor<K, C>
where
    K: Ord + Clone + Debug + Send,
    C: DBCursor,
    C::Record: Record,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, C> DBCursor for CompositeDBCursor<K, C>
where
    K: Ord + Clone + Debug + Send,
    C: DBCursor,
    C::Record: Record,
{
    type Record = C::Record;

    fn record(&self) -> Option<&C::Record> {
        let key = self.current.as_ref()?;
        let slot = self.slots.get(key)?;
        match slot.state {
            SlotState::Positioned => slot.cursor.record(),
            _ => None,
        }
    }

    fn next(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.apply_removals();

        if let Some(key) = self.current.take() {
            if let Some(slot) = self.slots.get_mut(&key) {
                if slot.state == SlotState::Positioned {
                    slot.state = SlotState::Pending;
                }
            }
        }

        // A failing slot keeps its state so that a retry polls it again.
        for (key, slot) in self.slots.iter_mut() {
            if slot.state == SlotState::Positioned {
                continue;
            }
            let was_exhausted = slot.state == SlotState::Exhausted;
            let advanced = slot.cursor.next().map_err(|err| {
                warn!(key = ?key, error = %err, "sub-cursor failed to advance");
                err
            })?;
            slot.state = if advanced {
                SlotState::Positioned
            } else {
                if !was_exhausted {
                    debug!(key = ?key, "sub-cursor exhausted");
                }
                SlotState::Exhausted
            };
        }

        self.current = self.select_min();
        Ok(self.current.is_some())
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        for (_, mut slot) in std::mem::take(&mut self.slots) {
            slot.cursor.close();
        }
        self.removals.drain();
        self.current = None;
        self.closed = true;
    }
}
