//! Change Sequence Numbers.
//!
//! A CSN identifies one replicated change. It combines the wall clock
//! time at which the change was stamped, a sequence number that orders
//! changes stamped within the same millisecond, and the identifier of the
//! replica that originated the change.
//!
//! CSNs are used as storage keys, so both the binary and the string
//! encodings are fixed-width and sign-adjusted: comparing two encodings
//! byte by byte gives the same answer as comparing the CSNs.

use crate::ids::ReplicaId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length in bytes of the binary CSN encoding.
pub const CSN_BYTE_LEN: usize = 16;

/// Length in characters of the string CSN encoding.
pub const CSN_STRING_LEN: usize = 32;

const TIMESTAMP_SIGN_BIT: u64 = 1 << 63;
const REPLICA_SIGN_BIT: u32 = 1 << 31;

/// Errors raised while decoding CSNs or server states.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Invalid CSN length: expected {expected}, found {found}")]
    InvalidLength { expected: usize, found: usize },

    #[error("Invalid CSN string: {0}")]
    InvalidString(String),

    #[error("Range {offset}..{end} is out of bounds for a buffer of {len} bytes")]
    OutOfBounds { offset: usize, end: usize, len: usize },
}

/// A Change Sequence Number.
///
/// Ordered by timestamp, then sequence number, then replica id.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Csn {
    timestamp_millis: i64,
    seqnum: u32,
    replica_id: ReplicaId,
}

impl Csn {
    pub const fn new(timestamp_millis: i64, seqnum: u32, replica_id: ReplicaId) -> Self {
        Self {
            timestamp_millis,
            seqnum,
            replica_id,
        }
    }

    /// Wall clock time, in milliseconds since the Unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_millis
    }

    pub fn seqnum(&self) -> u32 {
        self.seqnum
    }

    pub fn replica_id(&self) -> ReplicaId {
        self.replica_id
    }

    pub fn is_older_than(&self, other: &Csn) -> bool {
        self < other
    }

    pub fn is_older_than_or_equal(&self, other: &Csn) -> bool {
        self <= other
    }

    pub fn is_newer_than(&self, other: &Csn) -> bool {
        self > other
    }

    /// Milliseconds elapsed between `other` and `self` (negative when
    /// `self` was stamped first).
    pub fn time_diff_millis(&self, other: &Csn) -> i64 {
        self.timestamp_millis.saturating_sub(other.timestamp_millis)
    }

    /// The `(timestamp, seqnum)` pair, ignoring the replica.
    pub(crate) fn clock_position(&self) -> (i64, u32) {
        (self.timestamp_millis, self.seqnum)
    }

    /// Encode to the fixed-width, order-preserving binary form.
    pub fn to_bytes(&self) -> [u8; CSN_BYTE_LEN] {
        let mut out = [0u8; CSN_BYTE_LEN];
        let ts = (self.timestamp_millis as u64) ^ TIMESTAMP_SIGN_BIT;
        let replica = (self.replica_id as u32) ^ REPLICA_SIGN_BIT;
        out[0..8].copy_from_slice(&ts.to_be_bytes());
        out[8..12].copy_from_slice(&self.seqnum.to_be_bytes());
        out[12..16].copy_from_slice(&replica.to_be_bytes());
        out
    }

    /// Decode from the binary form produced by [`Csn::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() != CSN_BYTE_LEN {
            return Err(DecodeError::InvalidLength {
                expected: CSN_BYTE_LEN,
                found: bytes.len(),
            });
        }

        let mut ts = [0u8; 8];
        let mut seq = [0u8; 4];
        let mut replica = [0u8; 4];
        ts.copy_from_slice(&bytes[0..8]);
        seq.copy_from_slice(&bytes[8..12]);
        replica.copy_from_slice(&bytes[12..16]);

        Ok(Self {
            timestamp_millis: (u64::from_be_bytes(ts) ^ TIMESTAMP_SIGN_BIT) as i64,
            seqnum: u32::from_be_bytes(seq),
            replica_id: (u32::from_be_bytes(replica) ^ REPLICA_SIGN_BIT) as ReplicaId,
        })
    }
}

impl Ord for Csn {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp_millis
            .cmp(&other.timestamp_millis)
            .then_with(|| self.seqnum.cmp(&other.seqnum))
            .then_with(|| self.replica_id.cmp(&other.replica_id))
    }
}

impl PartialOrd for Csn {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Lowercase hexadecimal: 16 digits of timestamp, 8 of seqnum, 8 of
/// replica id, with the sign bits flipped like the binary form.
impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:016x}{:08x}{:08x}",
            (self.timestamp_millis as u64) ^ TIMESTAMP_SIGN_BIT,
            self.seqnum,
            (self.replica_id as u32) ^ REPLICA_SIGN_BIT
        )
    }
}

impl FromStr for Csn {
    type Err = DecodeError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        if raw.len() != CSN_STRING_LEN {
            return Err(DecodeError::InvalidLength {
                expected: CSN_STRING_LEN,
                found: raw.len(),
            });
        }
        if !raw.bytes().all(|byte| byte.is_ascii_hexdigit()) {
            return Err(DecodeError::InvalidString(raw.to_string()));
        }

        let invalid = |_| DecodeError::InvalidString(raw.to_string());
        let ts = u64::from_str_radix(&raw[0..16], 16).map_err(invalid)?;
        let seqnum = u32::from_str_radix(&raw[16..24], 16).map_err(invalid)?;
        let replica = u32::from_str_radix(&raw[24..32], 16).map_err(invalid)?;

        Ok(Self {
            timestamp_millis: (ts ^ TIMESTAMP_SIGN_BIT) as i64,
            seqnum,
            replica_id: (replica ^ REPLICA_SIGN_BIT) as ReplicaId,
        })
    }
}

impl TryFrom<String> for Csn {
    type Error = DecodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Csn> for String {
    fn from(csn: Csn) -> Self {
        csn.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csn_ordering() {
        let a = Csn::new(100, 0, 1);
        let b = Csn::new(100, 1, 1);
        let c = Csn::new(100, 1, 2);
        let d = Csn::new(101, 0, 0);

        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
        assert_eq!(a.cmp(&a), Ordering::Equal);
        assert_ne!(a, Csn::new(100, 0, 2));
    }

    #[test]
    fn test_csn_helpers() {
        let old = Csn::new(100, 0, 1);
        let new = Csn::new(250, 0, 1);

        assert!(old.is_older_than(&new));
        assert!(old.is_older_than_or_equal(&old));
        assert!(new.is_newer_than(&old));
        assert_eq!(new.time_diff_millis(&old), 150);
        assert_eq!(old.time_diff_millis(&new), -150);
    }

    #[test]
    fn test_byte_encoding_preserves_order_across_signs() {
        let csns = [
            Csn::new(-5, 0, 3),
            Csn::new(0, 0, -1),
            Csn::new(0, 0, 7),
            Csn::new(0, u32::MAX, -7),
            Csn::new(42, 2, 1),
        ];

        for pair in csns.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].to_bytes() < pair[1].to_bytes());
            assert!(pair[0].to_string() < pair[1].to_string());
        }
    }

    #[test]
    fn test_decode_rejects_wrong_length() {
        let err = Csn::from_bytes(&[0u8; 15]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::InvalidLength {
                expected: CSN_BYTE_LEN,
                found: 15
            }
        );

        assert!("abc".parse::<Csn>().is_err());
        assert!("zz000000000000000000000000000000".parse::<Csn>().is_err());
    }

    #[test]
    fn test_string_form_round_trip() {
        let csn = Csn::new(1_700_000_000_123, 42, 17);
        let text = csn.to_string();
        assert_eq!(text.len(), CSN_STRING_LEN);
        assert_eq!(text.parse::<Csn>().unwrap(), csn);
        assert_eq!(Csn::from_bytes(&csn.to_bytes()).unwrap(), csn);
    }

    #[test]
    fn test_csn_serialization() {
        let csn = Csn::new(1234, 5, 6);
        let json = serde_json::to_string(&csn).unwrap();
        assert_eq!(json, format!("\"{}\"", csn));
        let back: Csn = serde_json::from_str(&json).unwrap();
        assert_eq!(back, csn);
    }
}
