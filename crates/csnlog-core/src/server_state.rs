//! Server state: the newest CSN known from each replica.
//!
//! A server state is a vector clock over CSNs. Replication uses it to
//! resume a stream exactly where a consumer left off for every replica,
//! to detect gaps, and to seed CSN generators after a restart.
//!
//! Entries are monotonic: an update only replaces the CSN stored for a
//! replica when the new CSN is strictly greater.

use crate::csn::{Csn, DecodeError, CSN_BYTE_LEN};
use crate::ids::ReplicaId;
use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Clone, Debug, Default)]
struct Entries {
    /// Map from replica ID to the newest CSN seen from it.
    csns: BTreeMap<ReplicaId, Csn>,
    /// Whether the current content has been written to durable storage.
    saved: bool,
}

/// Per-replica high-water marks.
///
/// All methods take `&self`; concurrent updates are serialized by an
/// internal lock.
#[derive(Default)]
pub struct ServerState {
    entries: Mutex<Entries>,
}

impl ServerState {
    /// Create an empty server state.
    pub fn new() -> Self {
        ServerState {
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Create a server state from CSNs, keeping the newest per replica.
    pub fn from_csns(csns: impl IntoIterator<Item = Csn>) -> Self {
        let state = ServerState::new();
        for csn in csns {
            state.update(&csn);
        }
        state
    }

    /// Update the state with a CSN.
    ///
    /// Returns true if the CSN was newer than the one stored for its
    /// replica (or the replica was unknown) and has been recorded.
    pub fn update(&self, csn: &Csn) -> bool {
        let mut entries = self.entries.lock();
        let replaced = match entries.csns.get(&csn.replica_id()) {
            Some(current) => csn > current,
            None => true,
        };
        if replaced {
            entries.csns.insert(csn.replica_id(), *csn);
            entries.saved = false;
        }
        replaced
    }

    /// Like [`ServerState::update`], for a CSN that may be missing. A
    /// missing CSN is ignored and returns false.
    pub fn update_if_present(&self, csn: Option<&Csn>) -> bool {
        csn.is_some_and(|csn| self.update(csn))
    }

    /// Merge another state into this one (per-replica max).
    ///
    /// Returns true if any entry changed.
    pub fn update_state(&self, other: &ServerState) -> bool {
        let mut changed = false;
        for csn in other.snapshot() {
            changed |= self.update(&csn);
        }
        changed
    }

    /// Replace every entry with the entries of `other`.
    pub fn reload(&self, other: &ServerState) {
        let replacement = other.entries.lock().csns.clone();
        let mut entries = self.entries.lock();
        entries.csns = replacement;
        entries.saved = false;
    }

    /// The newest CSN known from a replica.
    pub fn max_csn(&self, replica_id: ReplicaId) -> Option<Csn> {
        self.entries.lock().csns.get(&replica_id).copied()
    }

    /// Check whether the state already includes `csn`, i.e. the stored
    /// CSN for its replica is greater than or equal to it.
    pub fn cover(&self, csn: &Csn) -> bool {
        self.entries
            .lock()
            .csns
            .get(&csn.replica_id())
            .is_some_and(|current| current >= csn)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.csns.clear();
        entries.saved = false;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().csns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().csns.len()
    }

    /// Replica ids present in the state, in ascending order.
    pub fn replica_ids(&self) -> Vec<ReplicaId> {
        self.entries.lock().csns.keys().copied().collect()
    }

    /// A consistent copy of the entries, in ascending replica order.
    pub fn snapshot(&self) -> Vec<Csn> {
        self.entries.lock().csns.values().copied().collect()
    }

    /// The string form of every CSN.
    pub fn to_string_set(&self) -> BTreeSet<String> {
        self.entries
            .lock()
            .csns
            .values()
            .map(|csn| csn.to_string())
            .collect()
    }

    pub fn is_saved(&self) -> bool {
        self.entries.lock().saved
    }

    pub fn set_saved(&self, saved: bool) {
        self.entries.lock().saved = saved;
    }

    /// Encode as the concatenation of each entry's binary CSN, in
    /// ascending replica order.
    pub fn to_wire_format(&self) -> Vec<u8> {
        let entries = self.entries.lock();
        let mut out = Vec::with_capacity(entries.csns.len() * CSN_BYTE_LEN);
        for csn in entries.csns.values() {
            out.extend_from_slice(&csn.to_bytes());
        }
        out
    }

    /// Decode `length` bytes of `bytes`, starting at `offset`.
    pub fn from_wire_format(bytes: &[u8], offset: usize, length: usize) -> Result<Self, DecodeError> {
        let end = offset.checked_add(length).ok_or(DecodeError::OutOfBounds {
            offset,
            end: usize::MAX,
            len: bytes.len(),
        })?;
        let window = bytes.get(offset..end).ok_or(DecodeError::OutOfBounds {
            offset,
            end,
            len: bytes.len(),
        })?;

        if window.len() % CSN_BYTE_LEN != 0 {
            return Err(DecodeError::InvalidLength {
                expected: (window.len() / CSN_BYTE_LEN + 1) * CSN_BYTE_LEN,
                found: window.len(),
            });
        }

        let state = ServerState::new();
        for chunk in window.chunks_exact(CSN_BYTE_LEN) {
            state.update(&Csn::from_bytes(chunk)?);
        }
        Ok(state)
    }
}

impl Clone for ServerState {
    fn clone(&self) -> Self {
        ServerState {
            entries: Mutex::new(self.entries.lock().clone()),
        }
    }
}

impl PartialEq for ServerState {
    fn eq(&self, other: &Self) -> bool {
        self.snapshot() == other.snapshot()
    }
}

impl Eq for ServerState {}

impl fmt::Debug for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.lock();
        f.debug_struct("ServerState")
            .field("csns", &entries.csns)
            .field("saved", &entries.saved)
            .finish()
    }
}

/// Space separated CSN strings, in ascending replica order.
impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let csns = self.snapshot();
        for (i, csn) in csns.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}", csn)?;
        }
        Ok(())
    }
}

impl Serialize for ServerState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ServerState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let csns = Vec::<Csn>::deserialize(deserializer)?;
        Ok(ServerState::from_csns(csns))
    }
}
