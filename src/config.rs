//! Engine configuration.
//!
//! The fingerprint width `W` and the partitioning `(P, B)` are fixed for the
//! lifetime of an index; changing them requires a full rebuild into a new
//! engine. The pigeonhole pruning used by queries is only sound when
//! `P >= D + 1`, so [`EngineConfig::validate`] rejects anything else instead
//! of silently under-recalling.

use crate::error::{RecommendError, Result};
use serde::{Deserialize, Serialize};

/// Largest supported fingerprint width (fingerprints are stored in a `u64`).
pub const MAX_WIDTH: u32 = 64;

/// Configuration for a [`crate::Recommender`] / [`crate::SimilarityIndex`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fingerprint width `W` in bits.
    pub width: u32,
    /// Number of partitions `P`. Partition width is `W / P`.
    pub partitions: u32,
    /// Maximum Hamming distance `D` for a neighbor.
    pub max_distance: u32,
    /// Result limit `K`.
    pub top_k: usize,
    /// Lock shards per partition table (and for the entry map).
    pub shards: usize,
    /// Pinned tokenizer version. Empty means "take it from the tokenizer".
    pub tokenizer_version: String,
    /// Pinned hasher version. Empty means "take it from the hasher".
    pub hasher_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 64,
            partitions: 4,
            max_distance: 3,
            top_k: 10,
            shards: 16,
            tokenizer_version: String::new(),
            hasher_version: String::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_width(mut self, width: u32) -> Self {
        self.width = width;
        self
    }

    pub fn with_partitions(mut self, partitions: u32) -> Self {
        self.partitions = partitions;
        self
    }

    pub fn with_max_distance(mut self, max_distance: u32) -> Self {
        self.max_distance = max_distance;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_shards(mut self, shards: usize) -> Self {
        self.shards = shards;
        self
    }

    pub fn with_versions(
        mut self,
        tokenizer_version: impl Into<String>,
        hasher_version: impl Into<String>,
    ) -> Self {
        self.tokenizer_version = tokenizer_version.into();
        self.hasher_version = hasher_version.into();
        self
    }

    /// Partition width `B = W / P`.
    ///
    /// Only meaningful on a validated config.
    pub fn partition_width(&self) -> u32 {
        if self.partitions == 0 {
            0
        } else {
            self.width / self.partitions
        }
    }

    /// Check every structural invariant.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.width > MAX_WIDTH {
            return Err(RecommendError::InvalidConfig(format!(
                "width must be in 1..={MAX_WIDTH}, got {}",
                self.width
            )));
        }
        if self.partitions == 0 || self.width % self.partitions != 0 {
            return Err(RecommendError::InvalidConfig(format!(
                "partitions ({}) must evenly divide width ({})",
                self.partitions, self.width
            )));
        }
        if self.partitions < self.max_distance + 1 {
            return Err(RecommendError::InvalidConfig(format!(
                "partitions ({}) must be at least max_distance + 1 ({})",
                self.partitions,
                self.max_distance + 1
            )));
        }
        if self.top_k == 0 {
            return Err(RecommendError::InvalidConfig(
                "top_k must be positive".to_string(),
            ));
        }
        if self.shards == 0 {
            return Err(RecommendError::InvalidConfig(
                "shards must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// True when two configs produce interchangeable fingerprints and slots.
    pub fn is_compatible_with(&self, other: &EngineConfig) -> bool {
        self.check_compatible(other).is_ok()
    }

    /// Like [`EngineConfig::is_compatible_with`], naming the first field that
    /// differs. `self` is the expected side.
    ///
    /// D, K and the shard count are free to differ.
    pub fn check_compatible(&self, other: &EngineConfig) -> Result<()> {
        let layout = |c: &EngineConfig| format!("W={} P={}", c.width, c.partitions);
        if self.width != other.width || self.partitions != other.partitions {
            return Err(RecommendError::VersionMismatch {
                what: "layout",
                expected: layout(self),
                actual: layout(other),
            });
        }
        if self.tokenizer_version != other.tokenizer_version {
            return Err(RecommendError::VersionMismatch {
                what: "tokenizer version",
                expected: self.tokenizer_version.clone(),
                actual: other.tokenizer_version.clone(),
            });
        }
        if self.hasher_version != other.hasher_version {
            return Err(RecommendError::VersionMismatch {
                what: "hasher version",
                expected: self.hasher_version.clone(),
                actual: other.hasher_version.clone(),
            });
        }
        Ok(())
    }
}
