//! Shared identifier wrappers for HarvestFlow.
//!
//! `JobId` mirrors the sqlite autoincrement primary key of `jobs.id`, so it
//! is a thin `i64` newtype rather than a UUID. `ProfileId` is opaque —
//! assigned by the external profile-provisioning service — so it stays a
//! string. `Fingerprint` is the intra-job dedup key (§3 of the spec).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sqlite-backed job identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(i64);

impl JobId {
    pub fn new(raw: i64) -> Self {
        Self(raw)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for JobId {
    fn from(raw: i64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque profile identifier handed out by the external profile-provisioning
/// service. The core never constructs one from scratch, only echoes it back.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProfileId(String);

impl ProfileId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ProfileId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

/// Intra-job deduplication key: the first 16 bytes of a BLAKE3 digest of the
/// dedup-basis string, rendered as lowercase hex. 128 bits is ample for the
/// per-job, bounded-cardinality record sets this system handles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint([u8; 16]);

impl Fingerprint {
    /// Compute the fingerprint for `(author, dedup_basis)` where
    /// `dedup_basis` is the canonical link if present, else the first 500
    /// characters of the record's content (see DESIGN.md, Open Question 2).
    pub fn compute(author: &str, dedup_basis: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(author.as_bytes());
        hasher.update(b"\0");
        hasher.update(dedup_basis.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest.as_bytes()[..16]);
        Self(bytes)
    }

    pub fn to_hex(self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    pub fn from_hex(hex: &str) -> Option<Self> {
        if hex.len() != 32 {
            return None;
        }
        let mut bytes = [0u8; 16];
        for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
            let s = std::str::from_utf8(chunk).ok()?;
            bytes[i] = u8::from_str_radix(s, 16).ok()?;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_roundtrips_through_i64() {
        let id = JobId::from(42);
        assert_eq!(id.get(), 42);
        assert_eq!(id.to_string(), "42");
    }

    #[test]
    fn fingerprint_is_deterministic() {
        let a = Fingerprint::compute("alice", "https://x.example/1");
        let b = Fingerprint::compute("alice", "https://x.example/1");
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_differs_on_author() {
        let a = Fingerprint::compute("alice", "https://x.example/1");
        let b = Fingerprint::compute("bob", "https://x.example/1");
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_hex_roundtrip() {
        let fp = Fingerprint::compute("alice", "hello world");
        let hex = fp.to_hex();
        assert_eq!(Fingerprint::from_hex(&hex), Some(fp));
    }
}
