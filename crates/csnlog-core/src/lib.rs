//! # csnlog-core
//!
//! Change sequencing primitives for multi-master replication.
//!
//! This crate provides:
//! - `Csn`: the totally ordered change sequence number `(timestamp, seqnum, replica)`
//! - `CsnGenerator`: per-replica factory of strictly increasing CSNs
//! - `ServerState`: per-replica high-water marks (a vector clock of CSNs)
//! - `Clock`: the wall clock capability the generator reads from
//!
//! ## Example
//!
//! ```rust
//! use csnlog_core::{CsnGenerator, ServerState};
//!
//! let generator = CsnGenerator::new(1);
//! let state = ServerState::new();
//!
//! let csn = generator.new_csn();
//! assert!(state.update(&csn));
//! assert!(state.cover(&csn));
//! ```

mod clock;
mod csn;
mod generator;
mod ids;
mod server_state;

pub use clock::{Clock, ManualClock, SystemClock};
pub use csn::{Csn, DecodeError, CSN_BYTE_LEN, CSN_STRING_LEN};
pub use generator::{CsnGenerator, GeneratorConfig, MAX_ADJUSTED_POSITION};
pub use ids::{DomainId, ReplicaId};
pub use server_state::ServerState;
