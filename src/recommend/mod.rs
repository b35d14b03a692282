//! Recommendation orchestration.
//!
//! [`Recommender`] ties the pipeline together:
//!
//! ```text
//! text ─▶ Tokenizer ─▶ weigh ─▶ FingerprintBuilder ─▶ SimilarityIndex
//!                                                        │
//! query id ─▶ resolve fingerprint ─▶ radius query ───────┘
//!                                      │
//!                                      ▼
//!             sort (distance asc, id asc) ─▶ drop self ─▶ top-K
//! ```
//!
//! Ties in distance are broken by ascending id. Queries have no side effects;
//! the index only changes through insert/update/delete/sync/refresh.

mod consistency;
mod pipeline;
mod source;
mod stream;

pub use consistency::ConsistencyReport;
pub use pipeline::Pipeline;
pub use source::{ContentSource, ContentStream, MemorySource};

use crate::config::EngineConfig;
use crate::error::{RecommendError, Result};
use crate::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::hash::{TokenHasher, Xxh64Hasher};
use crate::index::{
    CancelToken, EntityId, IndexState, IndexStats, MutationOutcome, Neighbor, RebuildStats,
    SimilarityIndex, Version, BASELINE_VERSION,
};
use crate::text::{Tokenizer, UnicodeTokenizer};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stream::FingerprintStream;

#[cfg(feature = "persistence")]
use crate::persistence::Snapshot;
#[cfg(feature = "persistence")]
use std::path::Path;

/// Ranked neighbors of one query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recommendations {
    /// Sorted by `(distance, id)`, self excluded, at most `top_k` long.
    pub neighbors: Vec<Neighbor>,
    /// The index could not apply some upstream change; results may lag.
    pub stale: bool,
}

impl Recommendations {
    pub fn ids(&self) -> Vec<EntityId> {
        self.neighbors.iter().map(|n| n.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.neighbors.len()
    }
}

/// Content-similarity recommendation engine.
///
/// All methods take `&self`; share one instance across worker threads behind
/// an `Arc`.
pub struct Recommender {
    config: EngineConfig,
    pipeline: Pipeline,
    index: SimilarityIndex,
    source: Option<Arc<dyn ContentSource>>,
    versions: AtomicU64,
}

fn pin_version(slot: &mut String, actual: &str, what: &'static str) -> Result<()> {
    if slot.is_empty() {
        *slot = actual.to_string();
        Ok(())
    } else if slot == actual {
        Ok(())
    } else {
        Err(RecommendError::VersionMismatch {
            what,
            expected: slot.clone(),
            actual: actual.to_string(),
        })
    }
}

impl Recommender {
    /// Create an engine. Empty version ids in `config` are filled from the
    /// tokenizer and hasher; non-empty ones must match them.
    pub fn new(
        mut config: EngineConfig,
        tokenizer: Arc<dyn Tokenizer>,
        hasher: Arc<dyn TokenHasher>,
    ) -> Result<Self> {
        pin_version(
            &mut config.tokenizer_version,
            tokenizer.version(),
            "tokenizer version",
        )?;
        pin_version(&mut config.hasher_version, hasher.version(), "hasher version")?;
        let index = SimilarityIndex::new(&config)?;
        let builder = FingerprintBuilder::new(config.width, hasher)?;
        Ok(Self {
            config,
            pipeline: Pipeline::new(tokenizer, builder),
            index,
            source: None,
            versions: AtomicU64::new(BASELINE_VERSION + 1),
        })
    }

    /// Engine with [`UnicodeTokenizer`] and [`Xxh64Hasher`].
    pub fn with_defaults(config: EngineConfig) -> Result<Self> {
        Self::new(
            config,
            Arc::new(UnicodeTokenizer::new()),
            Arc::new(Xxh64Hasher::new()),
        )
    }

    /// Attach the authoritative content store.
    pub fn with_source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn index(&self) -> &SimilarityIndex {
        &self.index
    }

    pub fn state(&self) -> IndexState {
        self.index.state()
    }

    pub fn stats(&self) -> IndexStats {
        self.index.stats()
    }

    fn source(&self) -> Result<&Arc<dyn ContentSource>> {
        self.source
            .as_ref()
            .ok_or_else(|| RecommendError::Source("no content source configured".to_string()))
    }

    /// Next auto-assigned mutation version.
    pub fn next_version(&self) -> Version {
        self.versions.fetch_add(1, Ordering::Relaxed)
    }

    /// Segment `text` with the configured tokenizer.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.pipeline.tokenize(text)
    }

    /// Fingerprint `text` without touching the index.
    pub fn fingerprint_text(&self, text: &str) -> Fingerprint {
        self.pipeline.fingerprint(text)
    }

    fn apply_upsert(
        &self,
        id: EntityId,
        fingerprint: Fingerprint,
        version: Version,
    ) -> Result<MutationOutcome> {
        if fingerprint.is_empty() {
            tracing::warn!(id, "content produced no tokens; excluded from matching");
        }
        self.index.upsert(id, fingerprint, version)
    }

    /// Index new content for `id`.
    pub fn insert(&self, id: EntityId, text: &str) -> Result<MutationOutcome> {
        self.upsert_versioned(id, text, self.next_version())
    }

    /// Replace the content of `id`. Same as [`Recommender::insert`]: the
    /// fingerprint is recomputed wholesale.
    pub fn update(&self, id: EntityId, text: &str) -> Result<MutationOutcome> {
        self.insert(id, text)
    }

    /// Insert or replace with a caller-supplied version (e.g. the content's
    /// modification counter). Older or equal versions are ignored.
    ///
    /// Do not mix caller versions with auto-assigned ones for the same id.
    pub fn upsert_versioned(
        &self,
        id: EntityId,
        text: &str,
        version: Version,
    ) -> Result<MutationOutcome> {
        let fingerprint = self.pipeline.fingerprint(text);
        self.apply_upsert(id, fingerprint, version)
    }

    /// Index many entities, fingerprinting them in parallel.
    pub fn insert_batch(&self, items: Vec<(EntityId, String)>) -> Result<Vec<MutationOutcome>> {
        let fingerprints: Vec<(EntityId, Fingerprint)> = items
            .into_par_iter()
            .map(|(id, text)| (id, self.pipeline.fingerprint(&text)))
            .collect();
        fingerprints
            .into_iter()
            .map(|(id, fp)| self.apply_upsert(id, fp, self.next_version()))
            .collect()
    }

    /// Remove `id` from the index.
    pub fn delete(&self, id: EntityId) -> Result<MutationOutcome> {
        self.index.delete(id, self.next_version())
    }

    pub fn delete_versioned(&self, id: EntityId, version: Version) -> Result<MutationOutcome> {
        self.index.delete(id, version)
    }

    /// Re-read `id` from the content source and apply whatever it holds now.
    ///
    /// A source failure leaves the index serving its old contents but marks
    /// it stale until the next successful refresh.
    pub fn sync(&self, id: EntityId) -> Result<MutationOutcome> {
        let source = self.source()?;
        let version = self.next_version();
        match source.fetch(id) {
            Ok(Some(text)) => self.upsert_versioned(id, &text, version),
            Ok(None) => self.index.delete(id, version),
            Err(e) => {
                tracing::warn!(id, error = %e, "content fetch failed; index is stale");
                self.index.mark_stale();
                Err(e)
            }
        }
    }

    fn resolve(&self, id: EntityId) -> Result<Fingerprint> {
        if let Some(fp) = self.index.get(id) {
            return Ok(fp);
        }
        let Some(source) = self.source.as_ref() else {
            return Err(RecommendError::NotFound(id));
        };
        match source.fetch(id)? {
            Some(text) => Ok(self.pipeline.fingerprint(&text)),
            None => Err(RecommendError::NotFound(id)),
        }
    }

    fn rank(&self, fingerprint: &Fingerprint, exclude: Option<EntityId>) -> Result<Recommendations> {
        let stale = self.index.is_stale();
        if fingerprint.is_empty() {
            tracing::debug!(?exclude, "empty fingerprint; no recommendations");
            return Ok(Recommendations {
                neighbors: Vec::new(),
                stale,
            });
        }
        let mut neighbors = self.index.query(fingerprint, self.config.max_distance)?;
        if let Some(id) = exclude {
            neighbors.retain(|n| n.id != id);
        }
        neighbors.truncate(self.config.top_k);
        Ok(Recommendations { neighbors, stale })
    }

    /// Entities similar to `id`, nearest first, never including `id`.
    ///
    /// An id the index has not seen yet is fingerprinted from the content
    /// source on the fly; without a source it is [`RecommendError::NotFound`].
    pub fn recommend(&self, id: EntityId) -> Result<Recommendations> {
        let fingerprint = self.resolve(id)?;
        self.rank(&fingerprint, Some(id))
    }

    /// Entities similar to a raw fingerprint, optionally excluding one id.
    pub fn recommend_fingerprint(
        &self,
        fingerprint: &Fingerprint,
        exclude: Option<EntityId>,
    ) -> Result<Recommendations> {
        self.rank(fingerprint, exclude)
    }

    /// Entities similar to unsaved text.
    pub fn recommend_text(&self, text: &str) -> Result<Recommendations> {
        self.rank(&self.pipeline.fingerprint(text), None)
    }

    /// Exact Hamming distance between two indexed entities.
    pub fn distance(&self, a: EntityId, b: EntityId) -> Result<u32> {
        self.index.distance(a, b)
    }

    /// Rebuild the whole index from the content source.
    ///
    /// Queries keep hitting the previous generation until the new one is
    /// published. On failure or cancellation the previous generation stays.
    pub fn refresh(&self, cancel: &CancelToken) -> Result<RebuildStats> {
        let source = self.source()?;
        let stream = FingerprintStream::new(&self.pipeline, source.scan()?);
        self.index.rebuild(stream, cancel).inspect_err(|e| {
            tracing::warn!(error = %e, tag = e.tag(), "refresh failed");
        })
    }

    /// Compare the index with the content source.
    ///
    /// Any divergence marks the index stale; it is repaired by [`Recommender::refresh`].
    pub fn check_consistency(&self) -> Result<ConsistencyReport> {
        let source = self.source()?;
        let indexed: HashMap<EntityId, Fingerprint> = self.index.entries().into_iter().collect();
        let mut seen: HashSet<EntityId> = HashSet::with_capacity(indexed.len());
        let mut report = ConsistencyReport::default();

        for item in FingerprintStream::new(&self.pipeline, source.scan()?).quiet() {
            let (id, fingerprint) = item?;
            seen.insert(id);
            report.checked += 1;
            match indexed.get(&id) {
                None => report.missing_from_index.push(id),
                Some(current) if *current != fingerprint => report.outdated.push(id),
                Some(_) => {}
            }
        }
        report.missing_from_store = indexed
            .keys()
            .copied()
            .filter(|id| !seen.contains(id))
            .collect();

        report.missing_from_index.sort_unstable();
        report.missing_from_store.sort_unstable();
        report.outdated.sort_unstable();

        if !report.is_consistent() {
            tracing::warn!(
                missing_from_index = report.missing_from_index.len(),
                missing_from_store = report.missing_from_store.len(),
                outdated = report.outdated.len(),
                "index diverges from content source"
            );
            self.index.mark_stale();
        }
        Ok(report)
    }

    /// Write the serving generation to `path`.
    #[cfg(feature = "persistence")]
    pub fn save_snapshot(&self, path: impl AsRef<Path>) -> Result<()> {
        Snapshot::capture(&self.index, &self.config).save(path)?;
        Ok(())
    }

    /// Replace the index with a snapshot taken under a compatible pipeline.
    #[cfg(feature = "persistence")]
    pub fn load_snapshot(&self, path: impl AsRef<Path>, cancel: &CancelToken) -> Result<RebuildStats> {
        let snapshot = Snapshot::load(path)?;
        self.config.check_compatible(&snapshot.header.config)?;
        self.index.rebuild(snapshot.entries.into_iter().map(Ok), cancel)
    }
}

impl std::fmt::Debug for Recommender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recommender")
            .field("config", &self.config)
            .field("pipeline", &self.pipeline)
            .field("index", &self.index)
            .field("has_source", &self.source.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::TableHasher;

    struct FailingSource;

    impl ContentSource for FailingSource {
        fn fetch(&self, _id: EntityId) -> Result<Option<String>> {
            Err(RecommendError::Source("store unreachable".into()))
        }

        fn scan(&self) -> Result<ContentStream<'_>> {
            Err(RecommendError::Source("store unreachable".into()))
        }
    }

    fn engine() -> Recommender {
        Recommender::with_defaults(EngineConfig::default()).unwrap()
    }

    const BASE: &str = "rust ownership borrowing lifetimes traits generics \
                        iterators closures modules crates cargo testing";

    #[test]
    fn test_versions_pinned_from_pipeline() {
        let engine = engine();
        assert_eq!(engine.config().tokenizer_version, UnicodeTokenizer::new().version());
        assert_eq!(engine.config().hasher_version, Xxh64Hasher::new().version());

        let config = EngineConfig::default().with_versions("other", "");
        let err = Recommender::with_defaults(config).unwrap_err();
        assert!(matches!(
            err,
            RecommendError::VersionMismatch {
                what: "tokenizer version",
                ..
            }
        ));
    }

    #[test]
    fn test_recommend_excludes_self() {
        let engine = engine();
        engine.insert(1, BASE).unwrap();
        engine.insert(2, BASE).unwrap();
        engine.insert(3, "completely unrelated pastry recipe butter flour").unwrap();

        let recs = engine.recommend(1).unwrap();
        assert_eq!(recs.ids(), vec![2]);
        assert_eq!(recs.neighbors[0].distance, 0);
        assert!(!recs.stale);
    }

    #[test]
    fn test_ties_break_by_id_and_truncate() {
        let engine = Recommender::with_defaults(EngineConfig::default().with_top_k(3)).unwrap();
        for id in [9, 4, 7, 1, 5] {
            engine.insert(id, BASE).unwrap();
        }
        let recs = engine.recommend(5).unwrap();
        assert_eq!(recs.ids(), vec![1, 4, 7]);
    }

    #[test]
    fn test_unknown_id_not_found() {
        let engine = engine();
        assert!(matches!(engine.recommend(42), Err(RecommendError::NotFound(42))));
        assert_eq!(engine.state(), IndexState::Empty);
    }

    #[test]
    fn test_unindexed_id_resolved_from_source() {
        let source = Arc::new(MemorySource::new());
        source.put(10, BASE);
        let engine = engine().with_source(source);
        engine.insert(1, BASE).unwrap();

        let recs = engine.recommend(10).unwrap();
        assert_eq!(recs.ids(), vec![1]);
        // Querying does not index.
        assert!(!engine.index().contains(10));
        assert!(matches!(engine.recommend(11), Err(RecommendError::NotFound(11))));
    }

    #[test]
    fn test_empty_content_yields_no_recommendations() {
        let engine = engine();
        engine.insert(1, "   ").unwrap();
        engine.insert(2, "the and of").unwrap();
        engine.insert(3, BASE).unwrap();

        assert!(engine.recommend(1).unwrap().is_empty());
        // Empty fingerprints never show up as neighbors either.
        assert!(engine.recommend(2).unwrap().is_empty());
        assert!(engine.recommend(3).unwrap().is_empty());
        assert!(engine.recommend_text("").unwrap().is_empty());
    }

    #[test]
    fn test_delete_removes_from_results() {
        let engine = engine();
        engine.insert(1, BASE).unwrap();
        engine.insert(2, BASE).unwrap();
        assert_eq!(engine.delete(2).unwrap(), MutationOutcome::Removed);
        assert!(engine.recommend(1).unwrap().is_empty());
        assert!(matches!(engine.distance(1, 2), Err(RecommendError::NotFound(2))));
    }

    #[test]
    fn test_update_moves_entity() {
        let engine = engine();
        engine.insert(1, BASE).unwrap();
        engine.insert(2, BASE).unwrap();
        assert_eq!(
            engine.update(2, "garden tomatoes watering schedule compost").unwrap(),
            MutationOutcome::Replaced
        );
        assert!(engine.recommend(1).unwrap().is_empty());
    }

    #[test]
    fn test_stale_versioned_update_ignored() {
        let engine = engine();
        engine.upsert_versioned(1, BASE, 10).unwrap();
        let outcome = engine.upsert_versioned(1, "something else", 9).unwrap();
        assert_eq!(outcome, MutationOutcome::Superseded);
        assert_eq!(engine.index().get(1), Some(engine.fingerprint_text(BASE)));
    }

    #[test]
    fn test_sync_failure_marks_stale() {
        let engine = engine().with_source(Arc::new(FailingSource));
        engine.insert(1, BASE).unwrap();
        engine.insert(2, BASE).unwrap();

        assert!(matches!(engine.sync(1), Err(RecommendError::Source(_))));
        assert_eq!(engine.state(), IndexState::Stale);

        let recs = engine.recommend(1).unwrap();
        assert_eq!(recs.ids(), vec![2]);
        assert!(recs.stale);
    }

    #[test]
    fn test_sync_applies_source_state() {
        let source = Arc::new(MemorySource::new());
        let engine = engine().with_source(source.clone());
        source.put(1, BASE);
        assert_eq!(engine.sync(1).unwrap(), MutationOutcome::Inserted);
        source.remove(1);
        assert_eq!(engine.sync(1).unwrap(), MutationOutcome::Removed);
    }

    #[test]
    fn test_refresh_failure_keeps_index() {
        let engine = engine().with_source(Arc::new(FailingSource));
        engine.insert(1, BASE).unwrap();
        assert!(matches!(
            engine.refresh(&CancelToken::new()),
            Err(RecommendError::Source(_))
        ));
        assert!(engine.index().contains(1));
        assert_eq!(engine.state(), IndexState::Ready);
    }

    #[test]
    fn test_refresh_without_source() {
        let engine = engine();
        assert!(matches!(
            engine.refresh(&CancelToken::new()),
            Err(RecommendError::Source(_))
        ));
    }

    #[test]
    fn test_consistency_report() {
        let source = Arc::new(MemorySource::new());
        let engine = engine().with_source(source.clone());
        source.put(1, BASE);
        source.put(2, "beta gamma");
        engine.refresh(&CancelToken::new()).unwrap();
        assert!(engine.check_consistency().unwrap().is_consistent());

        source.put(3, "new entry");
        source.remove(2);
        source.put(1, "rewritten content");
        let report = engine.check_consistency().unwrap();
        assert_eq!(report.missing_from_index, vec![3]);
        assert_eq!(report.missing_from_store, vec![2]);
        assert_eq!(report.outdated, vec![1]);
        assert_eq!(engine.state(), IndexState::Stale);

        engine.refresh(&CancelToken::new()).unwrap();
        assert!(engine.check_consistency().unwrap().is_consistent());
        assert_eq!(engine.state(), IndexState::Ready);
    }

    #[test]
    fn test_insert_batch() {
        let engine = engine();
        let items = (0..50u64).map(|i| (i, format!("{BASE} extra{i}"))).collect();
        let outcomes = engine.insert_batch(items).unwrap();
        assert_eq!(outcomes.len(), 50);
        assert!(outcomes.iter().all(|o| *o == MutationOutcome::Inserted));
        assert_eq!(engine.index().len(), 50);
    }

    #[test]
    fn test_toy_table_pipeline() {
        let hasher = TableHasher::new(
            "toy",
            [
                ("quick", 0b1100_1010u64),
                ("brown", 0b1010_0110),
                ("fox", 0b1001_0011),
                ("jumps", 0b1110_0001),
            ],
        );
        let config = EngineConfig::default()
            .with_width(8)
            .with_partitions(4)
            .with_max_distance(3);
        let engine =
            Recommender::new(config, Arc::new(UnicodeTokenizer::new()), Arc::new(hasher)).unwrap();
        assert_eq!(
            engine.tokenize("the quick brown fox jumps"),
            vec!["quick", "brown", "fox", "jumps"]
        );
        let fp = engine.fingerprint_text("the quick brown fox jumps");
        assert_eq!(fp.to_bit_string(), "10000010");
    }

    #[cfg(feature = "persistence")]
    #[test]
    fn test_snapshot_roundtrip_and_version_guard() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.snap");

        let engine = engine();
        engine.insert(1, BASE).unwrap();
        engine.insert(2, BASE).unwrap();
        engine.save_snapshot(&path).unwrap();

        let restored = self::engine();
        let stats = restored.load_snapshot(&path, &CancelToken::new()).unwrap();
        assert_eq!(stats.entries, 2);
        assert_eq!(restored.recommend(1).unwrap().ids(), vec![2]);

        let other = Recommender::new(
            EngineConfig::default(),
            Arc::new(UnicodeTokenizer::new()),
            Arc::new(Xxh64Hasher::with_seed(7)),
        )
        .unwrap();
        assert!(matches!(
            other.load_snapshot(&path, &CancelToken::new()),
            Err(RecommendError::VersionMismatch {
                what: "hasher version",
                ..
            })
        ));

        let narrow = Recommender::with_defaults(EngineConfig::default().with_width(32)).unwrap();
        assert!(matches!(
            narrow.load_snapshot(&path, &CancelToken::new()),
            Err(RecommendError::VersionMismatch { what: "layout", .. })
        ));
        assert!(narrow.index().is_empty());
    }
}
