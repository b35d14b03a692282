//! Snapshot file format.
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Magic bytes (4B): "SRSN"                │
//! │ Format version (4B, LE u32)             │
//! │ Checksum (8B, LE u64): xxh64 of payload │
//! ├─────────────────────────────────────────┤
//! │ Payload (postcard):                     │
//! │   - SnapshotHeader                      │
//! │     (config incl. pinned versions,      │
//! │      created timestamp, entry count)    │
//! │   - entries: [(id, fingerprint)]        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! A snapshot is only a warm-start aid. The authoritative content store can
//! always regenerate the index through a refresh.

use super::error::{PersistenceError, PersistenceResult};
use crate::config::EngineConfig;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh64::xxh64;

/// Magic bytes for snapshot files.
pub const SNAPSHOT_MAGIC: [u8; 4] = *b"SRSN";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Fixed-size prefix: magic + version + checksum.
pub const PREAMBLE_LEN: usize = 16;

const CHECKSUM_SEED: u64 = 0;

/// Metadata stored ahead of the entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    /// Configuration the fingerprints were produced under.
    pub config: EngineConfig,
    /// Creation timestamp (Unix seconds).
    pub created_at: u64,
    /// Number of entries that follow.
    pub entry_count: u64,
}

/// Frame a payload with the preamble.
pub(crate) fn frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(PREAMBLE_LEN + payload.len());
    out.extend_from_slice(&SNAPSHOT_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&xxh64(payload, CHECKSUM_SEED).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// Validate the preamble and return the payload.
pub(crate) fn unframe(bytes: &[u8]) -> PersistenceResult<&[u8]> {
    if bytes.len() < PREAMBLE_LEN {
        return Err(PersistenceError::Format(format!(
            "snapshot truncated: {} bytes",
            bytes.len()
        )));
    }
    let (preamble, payload) = bytes.split_at(PREAMBLE_LEN);
    if preamble[..4] != SNAPSHOT_MAGIC {
        return Err(PersistenceError::Format("bad magic bytes".to_string()));
    }
    let version = u32::from_le_bytes([preamble[4], preamble[5], preamble[6], preamble[7]]);
    if version != FORMAT_VERSION {
        return Err(PersistenceError::Format(format!(
            "unsupported format version {version} (expected {FORMAT_VERSION})"
        )));
    }
    let mut checksum = [0u8; 8];
    checksum.copy_from_slice(&preamble[8..16]);
    let expected = u64::from_le_bytes(checksum);
    let actual = xxh64(payload, CHECKSUM_SEED);
    if expected != actual {
        return Err(PersistenceError::ChecksumMismatch { expected, actual });
    }
    Ok(payload)
}
