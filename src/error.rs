//! Error types for simrec.

use thiserror::Error;

#[cfg(feature = "persistence")]
use crate::persistence::PersistenceError;

/// Errors surfaced by index and recommendation operations.
///
/// Degraded input (empty or unsegmentable text) is deliberately absent: it
/// produces an empty fingerprint instead of an error.
#[derive(Debug, Error)]
pub enum RecommendError {
    /// Engine configuration violates an invariant (e.g. `P * B != W` or `P < D + 1`).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No entity with this id is known to the index or the content source.
    #[error("entity {0} not found")]
    NotFound(u64),

    /// The entity exists but its fingerprint carries no signal.
    #[error("entity {0} has an empty fingerprint")]
    EmptyFingerprint(u64),

    /// Another refresh is already building a generation.
    #[error("a rebuild is already in progress")]
    RebuildInProgress,

    /// A refresh was cancelled before it could publish.
    #[error("rebuild cancelled")]
    Cancelled,

    /// The content collaborator failed.
    #[error("content source error: {0}")]
    Source(String),

    /// Fingerprint width differs from the engine's.
    #[error("fingerprint width mismatch: expected {expected} bits, got {actual}")]
    WidthMismatch { expected: u32, actual: u32 },

    /// Snapshot or fingerprint produced by an incompatible pipeline.
    #[error("{what} mismatch: expected {expected:?}, got {actual:?}")]
    VersionMismatch {
        what: &'static str,
        expected: String,
        actual: String,
    },

    /// Snapshot I/O or decoding failure.
    #[cfg(feature = "persistence")]
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl RecommendError {
    /// Short stable tag for the error class, suitable for metrics labels and
    /// remote error codes.
    pub fn tag(&self) -> &'static str {
        match self {
            RecommendError::InvalidConfig(_) => "invalid_config",
            RecommendError::NotFound(_) => "not_found",
            RecommendError::EmptyFingerprint(_) => "empty_fingerprint",
            RecommendError::RebuildInProgress => "rebuild_in_progress",
            RecommendError::Cancelled => "cancelled",
            RecommendError::Source(_) => "source",
            RecommendError::WidthMismatch { .. } => "width_mismatch",
            RecommendError::VersionMismatch { .. } => "version_mismatch",
            #[cfg(feature = "persistence")]
            RecommendError::Persistence(_) => "persistence",
        }
    }
}

pub type Result<T> = std::result::Result<T, RecommendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_context() {
        let err = RecommendError::WidthMismatch {
            expected: 64,
            actual: 32,
        };
        assert_eq!(
            err.to_string(),
            "fingerprint width mismatch: expected 64 bits, got 32"
        );
        assert_eq!(RecommendError::NotFound(7).to_string(), "entity 7 not found");
    }

    #[test]
    fn test_tags_are_distinct() {
        let errors = [
            RecommendError::InvalidConfig(String::new()),
            RecommendError::NotFound(1),
            RecommendError::EmptyFingerprint(1),
            RecommendError::RebuildInProgress,
            RecommendError::Cancelled,
            RecommendError::Source(String::new()),
        ];
        let tags: std::collections::HashSet<_> = errors.iter().map(|e| e.tag()).collect();
        assert_eq!(tags.len(), errors.len());
    }
}
