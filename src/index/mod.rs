//! Partitioned Hamming-radius index.
//!
//! # Pigeonhole pruning
//!
//! Split the `W`-bit fingerprint into `P` contiguous slices of `B = W / P`
//! bits. If two fingerprints differ in at most `D` bits and `P >= D + 1`,
//! the differing bits cannot touch every slice, so at least one slice is
//! bit-identical. A query therefore only needs the ids that share *some*
//! slice value with it:
//!
//! ```text
//! query ──▶ slice 0 ──▶ table 0 ─┐
//!       ──▶ slice 1 ──▶ table 1 ─┤ union ──▶ candidates ──▶ exact XOR+popcount ──▶ neighbors
//!       ──▶  ...                 │            (superset)        (≤ D only)
//!       ──▶ slice P-1 ─▶ table P-1┘
//! ```
//!
//! Query cost scales with candidate-set size (slot density) rather than
//! corpus size. Larger `P` tolerates larger `D` but makes slots denser and
//! inserts more expensive.
//!
//! # Concurrency
//!
//! - Slots live in sharded `RwLock`s per table; entry records in sharded
//!   `RwLock`s keyed by id. There is no global lock on the query path.
//! - A mutation holds its id's entry shard for the whole step: it adds the id
//!   to its new slots, publishes the record, then drops stale slots. Readers
//!   resolve candidates through the record, so they never act on a torn slot
//!   set. Mutations of one id serialize and are ordered by [`Version`].
//! - The whole generation (entries + tables) sits behind an `ArcSwap`.
//!   A refresh builds a new generation off to the side and publishes it with
//!   one pointer store. Mutations racing with a refresh are journaled and
//!   replayed into the new generation before it goes live.

mod builder;
mod entries;
mod partition;
mod state;

pub use builder::CancelToken;
pub use partition::PartitionTable;
pub use state::IndexState;

use crate::config::EngineConfig;
use crate::error::{RecommendError, Result};
use crate::fingerprint::Fingerprint;
use arc_swap::ArcSwap;
use builder::GenerationBuilder;
use entries::{EntryMap, Record};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use state::StateCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Caller-supplied opaque entity identifier.
pub type EntityId = u64;

/// Monotonic mutation version. Larger wins; equal or smaller is ignored.
pub type Version = u64;

/// Version assigned to entries loaded by a refresh. Caller versions start at 1.
pub const BASELINE_VERSION: Version = 0;

/// A query result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Neighbor {
    pub id: EntityId,
    pub distance: u32,
}

/// What a mutation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The id was not live before.
    Inserted,
    /// The id's previous fingerprint was replaced.
    Replaced,
    /// The id was live and is now removed.
    Removed,
    /// Delete of an id that was not live (a tombstone is still recorded).
    Absent,
    /// A newer (or equal) version was already applied; nothing changed.
    Superseded,
}

impl MutationOutcome {
    pub fn is_applied(&self) -> bool {
        !matches!(self, MutationOutcome::Superseded)
    }
}

/// Fixed geometry of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub width: u32,
    pub partitions: u32,
    pub slice_width: u32,
    pub shards: usize,
}

impl Layout {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            width: config.width,
            partitions: config.partitions,
            slice_width: config.partition_width(),
            shards: config.shards,
        })
    }

    /// Largest radius the pigeonhole pruning can answer without misses.
    pub fn max_sound_distance(&self) -> u32 {
        self.partitions - 1
    }
}

#[derive(Debug, Clone)]
enum Mutation {
    Upsert {
        id: EntityId,
        fingerprint: Fingerprint,
        version: Version,
    },
    Delete {
        id: EntityId,
        version: Version,
    },
}

/// A complete, self-consistent set of entries and partition tables.
#[derive(Debug)]
pub(crate) struct Generation {
    pub(crate) number: u64,
    pub(crate) entries: EntryMap,
    pub(crate) tables: Vec<PartitionTable>,
}

impl Generation {
    fn empty(number: u64, layout: &Layout) -> Self {
        Self {
            number,
            entries: EntryMap::new(layout.shards),
            tables: (0..layout.partitions)
                .map(|p| PartitionTable::new(p, layout.shards))
                .collect(),
        }
    }

    fn upsert(
        &self,
        layout: &Layout,
        id: EntityId,
        fingerprint: Fingerprint,
        version: Version,
    ) -> MutationOutcome {
        let b = layout.slice_width;
        let mut shard = self.entries.lock(id);
        let previous = shard.get(&id).copied();
        if previous.is_some_and(|r| r.version() >= version) {
            return MutationOutcome::Superseded;
        }
        let old = previous.and_then(|r| r.live());
        let old_signal = old.filter(|fp| !fp.is_empty());

        // New slots first, so the id is reachable under whichever record a
        // reader resolves.
        if !fingerprint.is_empty() {
            for (p, table) in (0..).zip(&self.tables) {
                let key = fingerprint.slice(p, b);
                if old_signal.is_none_or(|o| o.slice(p, b) != key) {
                    table.insert(key, id);
                }
            }
        }

        shard.insert(
            id,
            Record::Live {
                fingerprint,
                version,
            },
        );

        if let Some(o) = old_signal {
            for (p, table) in (0..).zip(&self.tables) {
                let key = o.slice(p, b);
                if fingerprint.is_empty() || fingerprint.slice(p, b) != key {
                    table.remove(key, id);
                }
            }
        }

        if old.is_some() {
            MutationOutcome::Replaced
        } else {
            MutationOutcome::Inserted
        }
    }

    fn delete(&self, layout: &Layout, id: EntityId, version: Version) -> MutationOutcome {
        let mut shard = self.entries.lock(id);
        let previous = shard.get(&id).copied();
        if previous.is_some_and(|r| r.version() >= version) {
            return MutationOutcome::Superseded;
        }
        let old = previous.and_then(|r| r.live());

        shard.insert(id, Record::Tombstone { version });

        if let Some(o) = old.filter(|fp| !fp.is_empty()) {
            for (p, table) in (0..).zip(&self.tables) {
                table.remove(o.slice(p, layout.slice_width), id);
            }
        }

        if old.is_some() {
            MutationOutcome::Removed
        } else {
            MutationOutcome::Absent
        }
    }

    fn apply(&self, layout: &Layout, mutation: &Mutation) -> MutationOutcome {
        match *mutation {
            Mutation::Upsert {
                id,
                fingerprint,
                version,
            } => self.upsert(layout, id, fingerprint, version),
            Mutation::Delete { id, version } => self.delete(layout, id, version),
        }
    }

    fn candidates(&self, layout: &Layout, query: &Fingerprint) -> Vec<EntityId> {
        let mut out = Vec::new();
        for (p, table) in (0..).zip(&self.tables) {
            table.collect_into(query.slice(p, layout.slice_width), &mut out);
        }
        out.sort_unstable();
        out.dedup();
        out
    }

    fn query(&self, layout: &Layout, query: &Fingerprint, max_distance: u32) -> Vec<Neighbor> {
        let candidates = self.candidates(layout, query);
        let mut neighbors: Vec<Neighbor> = candidates
            .iter()
            .filter_map(|&id| {
                let fp = self.entries.get(id).filter(|fp| !fp.is_empty())?;
                let distance = query.hamming_distance(&fp);
                (distance <= max_distance).then_some(Neighbor { id, distance })
            })
            .collect();
        neighbors.sort_unstable_by_key(|n| (n.distance, n.id));
        tracing::debug!(
            generation = self.number,
            candidates = candidates.len(),
            matches = neighbors.len(),
            "index query"
        );
        neighbors
    }
}

/// Summary of a completed rebuild.
#[derive(Debug, Clone, Default)]
pub struct RebuildStats {
    /// Generation number now serving.
    pub generation: u64,
    /// Entries loaded from the source.
    pub entries: usize,
    /// Of those, entries with an empty fingerprint.
    pub empty: usize,
    /// Mutations that raced with the build and were replayed into it.
    pub replayed: usize,
    /// Time spent building and publishing (microseconds).
    pub duration_us: u64,
}

/// Point-in-time index statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub state: IndexState,
    pub generation: u64,
    /// Live entries, including empty fingerprints.
    pub entries: usize,
    pub empty_entries: usize,
    pub tombstones: usize,
    /// Distinct slice values per partition table.
    pub slot_keys: Vec<usize>,
    /// Largest slot over all tables.
    pub largest_slot: usize,
}

/// Thread-safe similarity index over id → fingerprint.
pub struct SimilarityIndex {
    layout: Layout,
    current: ArcSwap<Generation>,
    state: StateCell,
    /// Shared by mutations, exclusive for a refresh's publish step.
    gate: RwLock<()>,
    /// `Some` while a refresh is building.
    journal: Mutex<Option<Vec<Mutation>>>,
    rebuilding: AtomicBool,
    generations: AtomicU64,
}

impl SimilarityIndex {
    /// Create an empty index. Fails fast on an invalid configuration.
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let layout = Layout::from_config(config)?;
        Ok(Self {
            layout,
            current: ArcSwap::from_pointee(Generation::empty(0, &layout)),
            state: StateCell::new(),
            gate: RwLock::new(()),
            journal: Mutex::new(None),
            rebuilding: AtomicBool::new(false),
            generations: AtomicU64::new(0),
        })
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn state(&self) -> IndexState {
        self.state.get()
    }

    /// True when served results may miss applied-upstream changes.
    pub fn is_stale(&self) -> bool {
        self.state.serving() == IndexState::Stale
    }

    /// Record that some upstream change could not be applied.
    pub fn mark_stale(&self) {
        tracing::warn!("similarity index marked stale");
        self.state.mark_stale();
    }

    /// Number of the generation currently serving.
    pub fn generation(&self) -> u64 {
        self.current.load().number
    }

    /// Live entries, including those with empty fingerprints.
    pub fn len(&self) -> usize {
        self.current.load().entries.counts().live
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Current fingerprint of `id`.
    pub fn get(&self, id: EntityId) -> Option<Fingerprint> {
        self.current.load().entries.get(id)
    }

    /// Version of the last mutation applied to `id`, including deletes.
    pub fn version_of(&self, id: EntityId) -> Option<Version> {
        self.current.load().entries.record(id).map(|r| r.version())
    }

    fn check_width(&self, fingerprint: &Fingerprint) -> Result<()> {
        if fingerprint.width() != self.layout.width {
            return Err(RecommendError::WidthMismatch {
                expected: self.layout.width,
                actual: fingerprint.width(),
            });
        }
        Ok(())
    }

    fn mutate(&self, mutation: Mutation) -> MutationOutcome {
        let _gate = self.gate.read();
        let outcome = self.current.load().apply(&self.layout, &mutation);
        if let Some(journal) = self.journal.lock().as_mut() {
            journal.push(mutation);
        }
        outcome
    }

    /// Insert `id` or replace its fingerprint.
    pub fn upsert(
        &self,
        id: EntityId,
        fingerprint: Fingerprint,
        version: Version,
    ) -> Result<MutationOutcome> {
        self.check_width(&fingerprint)?;
        let outcome = self.mutate(Mutation::Upsert {
            id,
            fingerprint,
            version,
        });
        match outcome {
            MutationOutcome::Superseded => {
                tracing::trace!(id, version, "upsert superseded by newer version");
            }
            _ => {
                self.state.on_upsert();
                tracing::debug!(id, version, ?outcome, "upsert applied");
            }
        }
        Ok(outcome)
    }

    /// Remove `id`.
    pub fn delete(&self, id: EntityId, version: Version) -> Result<MutationOutcome> {
        let outcome = self.mutate(Mutation::Delete { id, version });
        match outcome {
            MutationOutcome::Superseded => {
                tracing::trace!(id, version, "delete superseded by newer version");
            }
            _ => tracing::debug!(id, version, ?outcome, "delete applied"),
        }
        Ok(outcome)
    }

    fn check_distance(&self, max_distance: u32) -> Result<()> {
        if max_distance > self.layout.max_sound_distance() {
            return Err(RecommendError::InvalidConfig(format!(
                "max_distance {max_distance} exceeds {} for {} partitions",
                self.layout.max_sound_distance(),
                self.layout.partitions
            )));
        }
        Ok(())
    }

    /// Ids sharing at least one slice with `query`, before distance filtering.
    pub fn candidates(&self, query: &Fingerprint) -> Result<Vec<EntityId>> {
        self.check_width(query)?;
        if query.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.current.load().candidates(&self.layout, query))
    }

    /// Every id within `max_distance` of `query`, sorted by `(distance, id)`.
    ///
    /// Empty query fingerprints match nothing.
    pub fn query(&self, query: &Fingerprint, max_distance: u32) -> Result<Vec<Neighbor>> {
        self.check_width(query)?;
        self.check_distance(max_distance)?;
        if query.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.current.load().query(&self.layout, query, max_distance))
    }

    /// Exact Hamming distance between two indexed entities.
    pub fn distance(&self, a: EntityId, b: EntityId) -> Result<u32> {
        let generation = self.current.load();
        let fa = generation.entries.get(a).ok_or(RecommendError::NotFound(a))?;
        let fb = generation.entries.get(b).ok_or(RecommendError::NotFound(b))?;
        if fa.is_empty() {
            return Err(RecommendError::EmptyFingerprint(a));
        }
        if fb.is_empty() {
            return Err(RecommendError::EmptyFingerprint(b));
        }
        Ok(fa.hamming_distance(&fb))
    }

    /// All live entries sorted by id.
    pub fn entries(&self) -> Vec<(EntityId, Fingerprint)> {
        let mut out = Vec::new();
        self.current
            .load()
            .entries
            .for_each_live(|id, fp| out.push((id, fp)));
        out.sort_unstable_by_key(|(id, _)| *id);
        out
    }

    /// Live ids sorted ascending.
    pub fn ids(&self) -> Vec<EntityId> {
        self.entries().into_iter().map(|(id, _)| id).collect()
    }

    /// Replace the whole index with `entries`.
    ///
    /// The new generation is built while the old one keeps serving queries
    /// and mutations; it goes live with a single atomic swap. Any error from
    /// `entries`, or cancellation, leaves the old generation untouched. Only
    /// one rebuild may run at a time.
    pub fn rebuild<I>(&self, entries: I, cancel: &CancelToken) -> Result<RebuildStats>
    where
        I: IntoIterator<Item = Result<(EntityId, Fingerprint)>>,
    {
        if self
            .rebuilding
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RecommendError::RebuildInProgress);
        }
        let mut guard = RebuildGuard {
            index: self,
            published: false,
        };

        let start = Instant::now();
        self.state.begin_build();
        *self.journal.lock() = Some(Vec::new());
        tracing::info!(generation = self.generation(), "rebuild started");

        let mut builder = GenerationBuilder::new(self.layout);
        for (n, entry) in entries.into_iter().enumerate() {
            if n % 1024 == 0 {
                cancel.check()?;
            }
            let (id, fingerprint) = entry?;
            self.check_width(&fingerprint)?;
            builder.insert(id, fingerprint);
        }
        let loaded = builder.len();
        let empty = builder.empty_count();

        let number = self.generations.fetch_add(1, Ordering::AcqRel) + 1;
        let generation = builder.build(number, cancel)?;

        let replayed = {
            let _gate = self.gate.write();
            cancel.check()?;
            let journal = self.journal.lock().take().unwrap_or_default();
            for mutation in &journal {
                generation.apply(&self.layout, mutation);
            }
            self.current.store(Arc::new(generation));
            guard.published = true;
            journal.len()
        };

        let state = self.state.finish_build(true);
        let stats = RebuildStats {
            generation: number,
            entries: loaded,
            empty,
            replayed,
            duration_us: start.elapsed().as_micros() as u64,
        };
        tracing::info!(
            generation = number,
            entries = loaded,
            empty,
            replayed,
            %state,
            duration_us = stats.duration_us,
            "rebuild published"
        );
        Ok(stats)
    }

    /// Reclaim delete tombstones with a version at or below `watermark`.
    ///
    /// Tombstones keep a late, older upsert from resurrecting a deleted id, so
    /// pass a watermark below which no mutation can still be in flight. A
    /// refresh drops every tombstone anyway; this is for services that delete
    /// heavily between refreshes. Returns the number of tombstones removed.
    pub fn purge_tombstones(&self, watermark: Version) -> usize {
        let removed = self.current.load().entries.purge_tombstones(watermark);
        tracing::debug!(watermark, removed, "tombstones purged");
        removed
    }

    /// True while a rebuild is in progress.
    pub fn is_rebuilding(&self) -> bool {
        self.rebuilding.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> IndexStats {
        let generation = self.current.load();
        let counts = generation.entries.counts();
        IndexStats {
            state: self.state(),
            generation: generation.number,
            entries: counts.live,
            empty_entries: counts.empty,
            tombstones: counts.tombstones,
            slot_keys: generation.tables.iter().map(PartitionTable::key_count).collect(),
            largest_slot: generation
                .tables
                .iter()
                .map(PartitionTable::largest_slot)
                .max()
                .unwrap_or(0),
        }
    }
}

impl std::fmt::Debug for SimilarityIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityIndex")
            .field("layout", &self.layout)
            .field("state", &self.state())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

/// Resets rebuild bookkeeping on every exit path.
struct RebuildGuard<'a> {
    index: &'a SimilarityIndex,
    published: bool,
}

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        if !self.published {
            let state = self.index.state.finish_build(false);
            tracing::info!(%state, "rebuild abandoned; previous generation retained");
        }
        *self.index.journal.lock() = None;
        self.index.rebuilding.store(false, Ordering::Release);
    }
}
