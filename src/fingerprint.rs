//! SimHash fingerprints.
//!
//! ## Algorithm
//!
//! For a document represented as weighted tokens:
//! 1. Initialize `W` signed accumulators to 0
//! 2. For each token `t` with weight `w`:
//!    - Hash `t` to get hash `h` (low `W` bits are used)
//!    - For each bit: `acc[i] += w` if `h[i] = 1`, else `acc[i] -= w`
//! 3. `fingerprint[i] = 1` if `acc[i] > 0`, else 0 (ties resolve to 0)
//!
//! Documents with highly overlapping weighted token sets land at small Hamming
//! distance; unrelated documents land near `W / 2`.
//!
//! An empty token set yields the all-zero fingerprint marked *empty*. Empty
//! fingerprints carry no signal and are kept out of similarity queries, since
//! otherwise every empty document would cluster with every other.
//!
//! ## References
//!
//! - Charikar (2002). "Similarity estimation techniques from rounding algorithms"
//! - Manku et al. (2007). "Detecting near-duplicates for web crawling"

use crate::config::MAX_WIDTH;
use crate::error::{RecommendError, Result};
use crate::hash::{weigh, TokenHasher, WeightedToken};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[inline]
pub(crate) fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// A fixed-width simhash.
///
/// Immutable: when content changes a new fingerprint is computed wholesale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    value: u64,
    width: u32,
    empty: bool,
}

impl Fingerprint {
    /// Wrap a raw value, masking it to `width` bits.
    pub fn from_value(value: u64, width: u32) -> Self {
        debug_assert!(width > 0 && width <= MAX_WIDTH);
        Self {
            value: value & width_mask(width),
            width,
            empty: false,
        }
    }

    /// The sentinel for documents without tokens.
    pub fn empty(width: u32) -> Self {
        Self {
            value: 0,
            width,
            empty: true,
        }
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    /// True for the no-signal sentinel.
    pub fn is_empty(&self) -> bool {
        self.empty
    }

    /// Number of differing bit positions (XOR + popcount).
    ///
    /// Both fingerprints must have the same width.
    #[inline]
    pub fn hamming_distance(&self, other: &Fingerprint) -> u32 {
        debug_assert_eq!(self.width, other.width, "fingerprint width mismatch");
        (self.value ^ other.value).count_ones()
    }

    /// Hamming distance with an explicit width check.
    pub fn try_distance(&self, other: &Fingerprint) -> Result<u32> {
        if self.width != other.width {
            return Err(RecommendError::WidthMismatch {
                expected: self.width,
                actual: other.width,
            });
        }
        Ok(self.hamming_distance(other))
    }

    /// Estimated cosine similarity of the source documents, `cos(pi * d / W)`.
    pub fn estimated_cosine(&self, other: &Fingerprint) -> f64 {
        let d = self.hamming_distance(other);
        let theta = std::f64::consts::PI * f64::from(d) / f64::from(self.width);
        theta.cos()
    }

    /// Value of the `partition`-th contiguous slice of `slice_width` bits,
    /// counting from the least significant bit.
    #[inline]
    pub fn slice(&self, partition: u32, slice_width: u32) -> u64 {
        (self.value >> (partition * slice_width)) & width_mask(slice_width)
    }

    /// Render as a `width`-character string of `0`/`1`, most significant bit first.
    pub fn to_bit_string(&self) -> String {
        (0..self.width)
            .rev()
            .map(|i| if (self.value >> i) & 1 == 1 { '1' } else { '0' })
            .collect()
    }

    /// Parse the output of [`Fingerprint::to_bit_string`].
    ///
    /// The width is the string length. A parsed fingerprint is never the empty
    /// sentinel, even when all bits are zero.
    pub fn parse_bit_string(s: &str) -> Result<Self> {
        let width = s.len() as u32;
        if width == 0 || width > MAX_WIDTH {
            return Err(RecommendError::InvalidConfig(format!(
                "bit string length must be in 1..={MAX_WIDTH}, got {width}"
            )));
        }
        let mut value = 0u64;
        for c in s.chars() {
            value <<= 1;
            match c {
                '1' => value |= 1,
                '0' => {}
                other => {
                    return Err(RecommendError::InvalidConfig(format!(
                        "invalid bit character {other:?}"
                    )))
                }
            }
        }
        Ok(Self::from_value(value, width))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.empty {
            write!(f, "<empty:{}>", self.width)
        } else {
            let digits = self.width.div_ceil(4) as usize;
            write!(f, "{:0digits$x}", self.value)
        }
    }
}

/// Reduces weighted token hashes into one fingerprint.
#[derive(Clone)]
pub struct FingerprintBuilder {
    width: u32,
    hasher: Arc<dyn TokenHasher>,
}

impl FingerprintBuilder {
    pub fn new(width: u32, hasher: Arc<dyn TokenHasher>) -> Result<Self> {
        if width == 0 || width > MAX_WIDTH {
            return Err(RecommendError::InvalidConfig(format!(
                "width must be in 1..={MAX_WIDTH}, got {width}"
            )));
        }
        Ok(Self { width, hasher })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn hasher(&self) -> &Arc<dyn TokenHasher> {
        &self.hasher
    }

    /// Compute the simhash of pre-weighted tokens.
    pub fn build(&self, tokens: &[WeightedToken]) -> Fingerprint {
        if tokens.is_empty() {
            return Fingerprint::empty(self.width);
        }

        let width = self.width as usize;
        let mut acc = [0i64; MAX_WIDTH as usize];

        for WeightedToken { token, weight } in tokens {
            let hash = self.hasher.hash(token);
            let w = i64::from(*weight);
            for (i, slot) in acc[..width].iter_mut().enumerate() {
                if (hash >> i) & 1 == 1 {
                    *slot += w;
                } else {
                    *slot -= w;
                }
            }
        }

        let mut value = 0u64;
        for (i, &a) in acc[..width].iter().enumerate() {
            if a > 0 {
                value |= 1u64 << i;
            }
        }

        Fingerprint::from_value(value, self.width)
    }

    /// Weigh a raw token sequence by term frequency, then build.
    pub fn build_from_tokens<I, S>(&self, tokens: I) -> Fingerprint
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.build(&weigh(tokens))
    }
}

impl fmt::Debug for FingerprintBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FingerprintBuilder")
            .field("width", &self.width)
            .field("hasher", &self.hasher.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{TableHasher, Xxh64Hasher};

    fn builder64() -> FingerprintBuilder {
        FingerprintBuilder::new(64, Arc::new(Xxh64Hasher::new())).unwrap()
    }

    #[test]
    fn test_toy_eight_bit_fingerprint() {
        let hasher = TableHasher::new(
            "toy",
            [
                ("quick", 0b1100_1010u64),
                ("brown", 0b1010_0110),
                ("fox", 0b1001_0011),
                ("jumps", 0b1110_0001),
            ],
        );
        let builder = FingerprintBuilder::new(8, Arc::new(hasher)).unwrap();
        let fp = builder.build_from_tokens(["quick", "brown", "fox", "jumps"]);

        // bit 7: +4, bit 1: +2, bits 0/5/6 tie at 0, bits 2/3/4 at -2.
        assert_eq!(fp.value(), 0b1000_0010);
        assert_eq!(fp.to_bit_string(), "10000010");
        assert!(!fp.is_empty());
    }

    #[test]
    fn test_weight_breaks_ties() {
        let hasher = TableHasher::new("toy", [("a", 0b01u64), ("b", 0b10)]);
        let builder = FingerprintBuilder::new(2, Arc::new(hasher)).unwrap();
        assert_eq!(builder.build_from_tokens(["a", "b"]).value(), 0b00);
        assert_eq!(builder.build_from_tokens(["a", "b", "a"]).value(), 0b01);
    }

    #[test]
    fn test_empty_tokens_yield_sentinel() {
        let fp = builder64().build(&[]);
        assert!(fp.is_empty());
        assert_eq!(fp.value(), 0);
        assert_eq!(fp.to_string(), "<empty:64>");
    }

    #[test]
    fn test_identical_tokens_identical_fingerprint() {
        let b = builder64();
        let fp1 = b.build_from_tokens(["hello", "world"]);
        let fp2 = b.build_from_tokens(["hello", "world"]);
        assert_eq!(fp1, fp2);
        assert_eq!(fp1.hamming_distance(&fp2), 0);
        assert!((fp1.estimated_cosine(&fp2) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_overlap_orders_distance() {
        let b = builder64();
        let base: Vec<String> = (0..40).map(|i| format!("w{i}")).collect();
        let mut near = base.clone();
        near[0] = "other".to_string();
        let far: Vec<String> = (100..140).map(|i| format!("w{i}")).collect();

        let fp = b.build_from_tokens(base);
        let d_near = fp.hamming_distance(&b.build_from_tokens(near));
        let d_far = fp.hamming_distance(&b.build_from_tokens(far));
        assert!(d_near < d_far, "near={d_near} far={d_far}");
    }

    #[test]
    fn test_slices_cover_value() {
        let fp = Fingerprint::from_value(0x1234_5678_9abc_def0, 64);
        assert_eq!(fp.slice(0, 16), 0xdef0);
        assert_eq!(fp.slice(1, 16), 0x9abc);
        assert_eq!(fp.slice(2, 16), 0x5678);
        assert_eq!(fp.slice(3, 16), 0x1234);
        assert_eq!(fp.slice(0, 64), fp.value());
    }

    #[test]
    fn test_bit_string_roundtrip_and_errors() {
        let fp = Fingerprint::from_value(0b1011, 6);
        assert_eq!(fp.to_bit_string(), "001011");
        assert_eq!(Fingerprint::parse_bit_string("001011").unwrap(), fp);
        assert!(Fingerprint::parse_bit_string("").is_err());
        assert!(Fingerprint::parse_bit_string("0120").is_err());
    }

    #[test]
    fn test_try_distance_width_mismatch() {
        let a = Fingerprint::from_value(1, 64);
        let b = Fingerprint::from_value(1, 32);
        assert!(matches!(
            a.try_distance(&b),
            Err(RecommendError::WidthMismatch {
                expected: 64,
                actual: 32
            })
        ));
    }

    #[test]
    fn test_from_value_masks() {
        let fp = Fingerprint::from_value(0xffff, 8);
        assert_eq!(fp.value(), 0xff);
    }
}
