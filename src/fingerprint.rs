//! Deterministic error fingerprinting.
//!
//! `std::collections::hash_map::DefaultHasher` is deliberately not used
//! here: its seed is randomized per process, which would break fingerprint
//! stability across restarts. FNV-1a is hand-rolled instead — small,
//! dependency-free, and deterministic, in the same spirit as this crate's
//! circuit breaker implementing its own jittered backoff rather than
//! reaching for an unused crate.

use crate::record::ErrorRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
const FNV_PRIME: u64 = 0x100000001b3;

const MESSAGE_PREFIX_LEN: usize = 256;
const STACK_FRAME_COUNT: usize = 3;
const FIELD_SEPARATOR: u8 = 0x1f;

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in bytes {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// The same deterministic FNV-1a hash used for error fingerprints, exposed
/// for other components (the HTTP request-dedup key) that need a stable
/// 64-bit digest without pulling in a second hashing dependency.
pub fn fnv1a_u64(bytes: &[u8]) -> u64 {
    fnv1a(bytes)
}

/// 64-bit hash collapsing structurally-equivalent errors, formatted as
/// lowercase hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Compute the fingerprint of `(name, message-prefix, first-N-frames)`.
    ///
    /// Deterministic and non-cryptographic: collisions are tolerated, but
    /// identical inputs always produce the identical fingerprint, including
    /// across process restarts.
    pub fn compute(name: &str, message: &str, stack: &[String]) -> Self {
        let mut buf = Vec::with_capacity(name.len() + message.len().min(MESSAGE_PREFIX_LEN) + 64);
        buf.extend_from_slice(name.as_bytes());
        buf.push(FIELD_SEPARATOR);

        let prefix_end = message
            .char_indices()
            .nth(MESSAGE_PREFIX_LEN)
            .map(|(idx, _)| idx)
            .unwrap_or(message.len());
        buf.extend_from_slice(message[..prefix_end].as_bytes());
        buf.push(FIELD_SEPARATOR);

        for frame in stack.iter().take(STACK_FRAME_COUNT) {
            buf.extend_from_slice(frame.as_bytes());
            buf.push(FIELD_SEPARATOR);
        }

        Self(fnv1a(&buf))
    }

    /// Compute (or re-derive) the fingerprint of an already-built record.
    pub fn of_record(record: &ErrorRecord) -> Self {
        Self::compute(&record.name, &record.message, &record.stack)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_deterministic_across_calls() {
        let a = Fingerprint::compute("DBError", "conn refused", &["at connect (db.js:1)".into()]);
        let b = Fingerprint::compute("DBError", "conn refused", &["at connect (db.js:1)".into()]);
        assert_eq!(a, b);
    }

    #[test]
    fn differs_on_name() {
        let a = Fingerprint::compute("DBError", "conn refused", &[]);
        let b = Fingerprint::compute("NetError", "conn refused", &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn only_considers_first_three_frames() {
        let a = Fingerprint::compute(
            "E",
            "m",
            &["f1".into(), "f2".into(), "f3".into(), "f4".into()],
        );
        let b = Fingerprint::compute(
            "E",
            "m",
            &["f1".into(), "f2".into(), "f3".into(), "different".into()],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn only_considers_message_prefix() {
        let long_message = "x".repeat(1000);
        let mut longer_message = long_message.clone();
        longer_message.push_str("tail-that-differs");
        let a = Fingerprint::compute("E", &long_message, &[]);
        let b = Fingerprint::compute("E", &longer_message, &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn formats_as_lowercase_hex() {
        let fp = Fingerprint(0xdeadbeef);
        assert_eq!(format!("{fp}"), "00000000deadbeef");
    }
}
