//! The cursor contract and its positioning options.

use crate::error::{ChangelogError, Result};
use csnlog_core::Csn;
use serde::{Deserialize, Serialize};
use std::marker::PhantomData;

/// How the requested key is matched against the keys present in a log.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyMatchingStrategy {
    /// Only a record with exactly the requested key matches.
    EqualToKey,
    /// The requested key or the nearest lower key matches.
    LessThanOrEqualToKey,
    /// The requested key or the nearest higher key matches.
    GreaterThanOrEqualToKey,
}

/// Where the cursor starts once a match has been found.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PositionStrategy {
    /// The first `next()` yields the matching record.
    OnMatchingKey,
    /// The first `next()` yields the first record after the requested key.
    AfterMatchingKey,
}

/// Options fixed when a cursor is opened.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorOptions {
    pub key_matching: KeyMatchingStrategy,
    pub position: PositionStrategy,
    /// Starting key for replicas the start state knows nothing about.
    pub default_csn: Option<Csn>,
}

impl CursorOptions {
    pub fn new(key_matching: KeyMatchingStrategy, position: PositionStrategy) -> Self {
        CursorOptions {
            key_matching,
            position,
            default_csn: None,
        }
    }

    pub fn with_default_csn(mut self, csn: Csn) -> Self {
        self.default_csn = Some(csn);
        self
    }

    /// Options resuming strictly after a previously consumed CSN.
    pub fn resume_after() -> Self {
        CursorOptions::new(
            KeyMatchingStrategy::GreaterThanOrEqualToKey,
            PositionStrategy::AfterMatchingKey,
        )
    }
}

impl Default for CursorOptions {
    fn default() -> Self {
        CursorOptions::new(
            KeyMatchingStrategy::GreaterThanOrEqualToKey,
            PositionStrategy::OnMatchingKey,
        )
    }
}

/// A forward-only cursor over CSN-ordered records.
///
/// A freshly opened cursor is positioned before its first record:
/// `record()` returns `None` until `next()` has returned `true`. Once
/// `next()` returns `false` the cursor is exhausted and `record()` is
/// `None`. Cursors over a growing log may return `true` again from a
/// later `next()` once records were appended past their position.
///
/// Cursors are single-owner. Callers must `close()` them to release the
/// underlying resources; `close()` is idempotent.
pub trait DBCursor: Send {
    type Record;

    /// The current record, or `None` when not positioned on one.
    fn record(&self) -> Option<&Self::Record>;

    /// Advance to the next record. Returns `false` when there is none.
    fn next(&mut self) -> Result<bool>;

    fn close(&mut self);

    /// The current record, failing when not positioned on one.
    fn current(&self) -> Result<&Self::Record> {
        self.record().ok_or(ChangelogError::NotPositioned)
    }
}

impl<C: DBCursor + ?Sized> DBCursor for Box<C> {
    type Record = C::Record;

    fn record(&self) -> Option<&Self::Record> {
        (**self).record()
    }

    fn next(&mut self) -> Result<bool> {
        (**self).next()
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// A cursor with no records.
pub struct EmptyCursor<R> {
    _record: PhantomData<fn() -> R>,
}

impl<R> EmptyCursor<R> {
    pub fn new() -> Self {
        EmptyCursor {
            _record: PhantomData,
        }
    }
}

impl<R> Default for EmptyCursor<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> DBCursor for EmptyCursor<R> {
    type Record = R;

    fn record(&self) -> Option<&R> {
        None
    }

    fn next(&mut self) -> Result<bool> {
        Ok(false)
    }

    fn close(&mut self) {}
}
