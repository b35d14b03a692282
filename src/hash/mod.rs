//! Token hashing and term-frequency weighting.
//!
//! A [`TokenHasher`] maps a token to a 64-bit value whose low `W` bits feed
//! the simhash accumulators. Bit quality matters: simhash relies on every bit
//! of the token hash behaving like an independent fair coin, otherwise
//! unrelated documents stop looking uncorrelated (expected distance `W / 2`).
//!
//! Hashers are versioned. Two hashers with different versions produce
//! incomparable fingerprints and must never feed the same index.

mod table;

pub use table::TableHasher;

use std::collections::HashMap;
use xxhash_rust::xxh64::xxh64;

/// Token → hash capability.
pub trait TokenHasher: Send + Sync {
    /// Hash a token. Identical text always hashes identically.
    fn hash(&self, token: &str) -> u64;

    /// Identifier pinned into the index configuration.
    fn version(&self) -> &str;
}

/// xxHash64 with a fixed seed.
///
/// Full avalanche on all 64 output bits, so narrower fingerprints can simply
/// take the low bits.
#[derive(Debug, Clone)]
pub struct Xxh64Hasher {
    seed: u64,
    version: String,
}

impl Xxh64Hasher {
    pub const DEFAULT_SEED: u64 = 0x5157_4841_5348_0001;

    pub fn new() -> Self {
        Self::with_seed(Self::DEFAULT_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            version: format!("xxh64-{seed:016x}"),
        }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl Default for Xxh64Hasher {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenHasher for Xxh64Hasher {
    #[inline]
    fn hash(&self, token: &str) -> u64 {
        xxh64(token.as_bytes(), self.seed)
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// A distinct token with its occurrence count in one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedToken {
    pub token: String,
    pub weight: u32,
}

/// Collapse a token sequence into distinct tokens weighted by term frequency.
///
/// Output order is first occurrence, so the result is deterministic for a
/// given input sequence.
pub fn weigh<I, S>(tokens: I) -> Vec<WeightedToken>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut weighted: Vec<WeightedToken> = Vec::new();

    for token in tokens {
        let token = token.into();
        match positions.get(&token) {
            Some(&pos) => weighted[pos].weight = weighted[pos].weight.saturating_add(1),
            None => {
                positions.insert(token.clone(), weighted.len());
                weighted.push(WeightedToken { token, weight: 1 });
            }
        }
    }

    weighted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xxh64_deterministic() {
        let h = Xxh64Hasher::new();
        assert_eq!(h.hash("fox"), h.hash("fox"));
        assert_ne!(h.hash("fox"), h.hash("dog"));
    }

    #[test]
    fn test_seed_changes_version_and_output() {
        let a = Xxh64Hasher::with_seed(1);
        let b = Xxh64Hasher::with_seed(2);
        assert_ne!(a.version(), b.version());
        assert_ne!(a.hash("fox"), b.hash("fox"));
    }

    #[test]
    fn test_bits_roughly_balanced() {
        let h = Xxh64Hasher::new();
        let n = 4096;
        let mut ones = [0u32; 64];
        for i in 0..n {
            let v = h.hash(&format!("token-{i}"));
            for (bit, count) in ones.iter_mut().enumerate() {
                *count += ((v >> bit) & 1) as u32;
            }
        }
        for count in ones {
            // Expected n/2 = 2048; allow a wide margin.
            assert!((1800..2300).contains(&count), "biased bit: {count}");
        }
    }

    #[test]
    fn test_weigh_counts_duplicates() {
        let weighted = weigh(["fox", "dog", "fox", "fox"]);
        assert_eq!(
            weighted,
            vec![
                WeightedToken {
                    token: "fox".into(),
                    weight: 3
                },
                WeightedToken {
                    token: "dog".into(),
                    weight: 1
                },
            ]
        );
    }

    #[test]
    fn test_weigh_empty() {
        assert!(weigh(Vec::<String>::new()).is_empty());
    }
}
