//! simrec: content-similarity recommendations over SimHash fingerprints.
//!
//! Text is tokenized, token hashes are folded into a fixed-width SimHash
//! fingerprint, and fingerprints are indexed in a partitioned table so that
//! every entity within Hamming distance `D` of a query is found without a
//! full scan.
//!
//! - `text/`: tokenizers and stopword lists (`JiebaTokenizer` for Chinese,
//!   feature `jieba`, on by default)
//! - `hash/`: token hashers and term weighting
//! - `fingerprint`: SimHash fingerprints and their builder
//! - `index/`: the concurrent partitioned index
//! - `recommend/`: the engine tying a content source to the index
//! - `persistence/`: snapshots (feature `persistence`)
//!
//! # Why partitioning finds everything
//!
//! Split a `W`-bit fingerprint into `P` slices. If two fingerprints differ in
//! at most `D < P` bits, those bits fall into at most `D` slices, so at least
//! one slice is identical. Looking up each slice of the query in its own
//! table therefore yields a candidate set that is a superset of the true
//! neighbors; an exact popcount over the candidates removes the rest.
//!
//! The price is candidate volume: with `B = W / P` bits per slice, each table
//! lookup returns roughly `N / 2^B` unrelated ids on random data.
//!
//! # Choosing a tokenizer
//!
//! [`Recommender::with_defaults`] segments on Unicode word boundaries, which
//! suits space-delimited languages. Text without word boundaries, such as
//! Chinese, needs model-based segmentation; pass a `text::JiebaTokenizer` to
//! [`Recommender::new`] instead.
//!
//! # Example
//!
//! ```
//! use simrec::{EngineConfig, Recommender};
//!
//! let engine = Recommender::with_defaults(EngineConfig::default())?;
//! engine.insert(1, "rust ownership and borrowing explained")?;
//! engine.insert(2, "rust ownership and borrowing explained")?;
//! engine.insert(3, "sourdough starter feeding schedule")?;
//!
//! let recs = engine.recommend(1)?;
//! assert_eq!(recs.ids(), vec![2]);
//! # Ok::<(), simrec::RecommendError>(())
//! ```

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod hash;
pub mod index;
pub mod recommend;
pub mod text;

#[cfg(feature = "persistence")]
pub mod persistence;

// Re-exports
pub use config::EngineConfig;
pub use error::{RecommendError, Result};
pub use fingerprint::{Fingerprint, FingerprintBuilder};
pub use hash::{TokenHasher, Xxh64Hasher};
pub use index::{
    CancelToken, EntityId, IndexState, IndexStats, MutationOutcome, Neighbor, RebuildStats,
    SimilarityIndex, Version,
};
pub use recommend::{ContentSource, ContentStream, MemorySource, Recommendations, Recommender};
pub use text::{Tokenizer, UnicodeTokenizer};
