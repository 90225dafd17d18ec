//! CSN generation.
//!
//! Each replica owns one generator per replicated domain. The generator
//! combines the wall clock with a per-millisecond sequence number so that
//! every CSN it returns is strictly greater than the previous one, even
//! when the wall clock stalls or moves backward.
//!
//! When the sequence number reaches its maximum while the clock has not
//! moved, the generator pushes the timestamp one millisecond ahead of the
//! clock instead of waiting. `new_csn` therefore never blocks and never
//! fails; the price is a CSN that may lead wall clock time slightly.
//!
//! The last millisecond of the timestamp range is kept for rollover:
//! `adjust` caps what it observes at [`MAX_ADJUSTED_POSITION`], and within
//! that millisecond the sequence number keeps growing up to `u32::MAX`.

use crate::clock::{Clock, SystemClock};
use crate::csn::Csn;
use crate::ids::ReplicaId;
use crate::server_state::ServerState;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Highest `(timestamp, seqnum)` position `adjust` moves a generator to.
pub const MAX_ADJUSTED_POSITION: (i64, u32) = (i64::MAX - 1, u32::MAX);

/// Configuration for a [`CsnGenerator`].
#[derive(Clone, Debug)]
pub struct GeneratorConfig {
    /// Largest sequence number issued within one millisecond before the
    /// timestamp is forced forward.
    pub max_seqnum: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig {
            max_seqnum: u32::MAX,
        }
    }
}

/// The `(timestamp, seqnum)` pair every future CSN must exceed.
#[derive(Clone, Copy, Debug, Default)]
struct GeneratorState {
    floor: Option<(i64, u32)>,
}

/// Per-replica factory of strictly increasing CSNs.
///
/// `new_csn` and `adjust` may be called from several threads; they are
/// serialized by an internal lock.
pub struct CsnGenerator {
    replica_id: ReplicaId,
    clock: Arc<dyn Clock>,
    config: GeneratorConfig,
    state: Mutex<GeneratorState>,
}

impl CsnGenerator {
    /// Create a generator reading the system clock.
    pub fn new(replica_id: ReplicaId) -> Self {
        Self::with_clock(replica_id, Arc::new(SystemClock))
    }

    /// Create a generator reading the provided clock.
    pub fn with_clock(replica_id: ReplicaId, clock: Arc<dyn Clock>) -> Self {
        Self::with_config(replica_id, clock, GeneratorConfig::default())
    }

    /// Create with custom configuration.
    pub fn with_config(replica_id: ReplicaId, clock: Arc<dyn Clock>, config: GeneratorConfig) -> Self {
        CsnGenerator {
            replica_id,
            clock,
            config,
            state: Mutex::new(GeneratorState::default()),
        }
    }

    /// Create a generator that will never issue a CSN lower than or equal
    /// to any CSN in `state`.
    ///
    /// Used after a restart, with the persisted state of the domain.
    pub fn from_state(replica_id: ReplicaId, state: &ServerState, clock: Arc<dyn Clock>) -> Self {
        let generator = Self::with_clock(replica_id, clock);
        generator.adjust_to_state(state);
        generator
    }

    /// Seed the generator with a CSN it must stay above.
    pub fn seeded(self, seed: &Csn) -> Self {
        self.adjust(seed);
        self
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    /// Generate a new CSN.
    pub fn new_csn(&self) -> Csn {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();

        let (timestamp, seqnum) = match state.floor {
            None => (now, 0),
            Some((last_ts, _)) if now > last_ts => (now, 0),
            Some((i64::MAX, last_seq)) => (i64::MAX, last_seq.saturating_add(1)),
            Some((last_ts, last_seq)) if last_seq >= self.config.max_seqnum => {
                trace!(
                    replica_id = self.replica_id,
                    timestamp = last_ts,
                    "seqnum exhausted, forcing timestamp forward"
                );
                (last_ts.saturating_add(1), 0)
            }
            Some((last_ts, last_seq)) => (last_ts, last_seq + 1),
        };

        state.floor = Some((timestamp, seqnum));
        Csn::new(timestamp, seqnum, self.replica_id)
    }

    /// Make sure the next generated CSN is greater than `csn`.
    ///
    /// Called with CSNs received from other replicas. A CSN that is not
    /// ahead of the generator leaves it untouched. Positions past
    /// [`MAX_ADJUSTED_POSITION`] are capped to it.
    pub fn adjust(&self, csn: &Csn) {
        let mut observed = csn.clock_position();
        if observed > MAX_ADJUSTED_POSITION {
            warn!(
                replica_id = self.replica_id,
                csn = %csn,
                "CSN at the end of the timestamp range, capping adjustment"
            );
            observed = MAX_ADJUSTED_POSITION;
        }
        let mut state = self.state.lock();

        let ahead = match state.floor {
            None => true,
            Some(floor) => observed > floor,
        };
        if ahead {
            debug!(
                replica_id = self.replica_id,
                csn = %csn,
                "adjusting CSN generator"
            );
            state.floor = Some(observed);
        }
    }

    /// Adjust with every CSN held in `state`.
    pub fn adjust_to_state(&self, state: &ServerState) {
        for csn in state.snapshot() {
            self.adjust(&csn);
        }
    }
}

impl fmt::Debug for CsnGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CsnGenerator")
            .field("replica_id", &self.replica_id)
            .field("config", &self.config)
            .field("floor", &self.state.lock().floor)
            .finish()
    }
}
