//! Authoritative id → fingerprint records.
//!
//! An entry record is the visibility point for a mutation: writers add an id
//! to its new partition slots *before* publishing the record and remove it
//! from stale slots *after*, so a reader that resolves a candidate through
//! this map never sees a torn mix of old and new slots.
//!
//! Deletes leave a tombstone carrying the delete's version. Without it a
//! delayed, older insert (e.g. a retried request) could resurrect a deleted
//! id. Tombstones are dropped when a refresh publishes a new generation, or
//! earlier by [`EntryMap::purge_tombstones`] once the caller knows no older
//! mutation can still arrive.

use super::partition::shard_of;
use super::{EntityId, Version};
use crate::fingerprint::Fingerprint;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::HashMap;

/// State of one id within a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Record {
    Live {
        fingerprint: Fingerprint,
        version: Version,
    },
    Tombstone {
        version: Version,
    },
}

impl Record {
    pub(crate) fn version(&self) -> Version {
        match self {
            Record::Live { version, .. } | Record::Tombstone { version } => *version,
        }
    }

    pub(crate) fn live(&self) -> Option<Fingerprint> {
        match self {
            Record::Live { fingerprint, .. } => Some(*fingerprint),
            Record::Tombstone { .. } => None,
        }
    }
}

pub(crate) type EntryShard = HashMap<EntityId, Record>;

/// Sharded entry records.
#[derive(Debug)]
pub(crate) struct EntryMap {
    shards: Box<[RwLock<EntryShard>]>,
}

impl EntryMap {
    pub(crate) fn new(shards: usize) -> Self {
        Self {
            shards: (0..shards.max(1))
                .map(|_| RwLock::new(EntryShard::new()))
                .collect(),
        }
    }

    pub(crate) fn from_records(shards: usize, records: HashMap<EntityId, Record>) -> Self {
        let n = shards.max(1);
        let mut split: Vec<EntryShard> = (0..n).map(|_| EntryShard::new()).collect();
        for (id, record) in records {
            split[shard_of(id, n)].insert(id, record);
        }
        Self {
            shards: split.into_iter().map(RwLock::new).collect(),
        }
    }

    #[inline]
    fn shard(&self, id: EntityId) -> &RwLock<EntryShard> {
        &self.shards[shard_of(id, self.shards.len())]
    }

    /// Exclusive access to the shard holding `id`.
    ///
    /// Holding this guard serializes all mutations of `id`.
    pub(crate) fn lock(&self, id: EntityId) -> RwLockWriteGuard<'_, EntryShard> {
        self.shard(id).write()
    }

    /// Current live fingerprint for `id`, if any.
    pub(crate) fn get(&self, id: EntityId) -> Option<Fingerprint> {
        self.shard(id).read().get(&id).and_then(Record::live)
    }

    pub(crate) fn record(&self, id: EntityId) -> Option<Record> {
        self.shard(id).read().get(&id).copied()
    }

    /// Visit every live entry. Each shard is read-locked while visited.
    pub(crate) fn for_each_live(&self, mut f: impl FnMut(EntityId, Fingerprint)) {
        for shard in self.shards.iter() {
            for (&id, record) in shard.read().iter() {
                if let Some(fp) = record.live() {
                    f(id, fp);
                }
            }
        }
    }

    /// Drop tombstones whose version is at or below `watermark`.
    ///
    /// Each shard is write-locked in turn, so this serializes with mutations
    /// of the ids in that shard. Returns the number removed.
    pub(crate) fn purge_tombstones(&self, watermark: Version) -> usize {
        let mut removed = 0;
        for shard in self.shards.iter() {
            let mut shard = shard.write();
            let before = shard.len();
            shard.retain(|_, record| {
                !matches!(record, Record::Tombstone { version } if *version <= watermark)
            });
            removed += before - shard.len();
        }
        removed
    }

    pub(crate) fn counts(&self) -> EntryCounts {
        let mut counts = EntryCounts::default();
        for shard in self.shards.iter() {
            for record in shard.read().values() {
                match record {
                    Record::Live { fingerprint, .. } if fingerprint.is_empty() => {
                        counts.live += 1;
                        counts.empty += 1;
                    }
                    Record::Live { .. } => counts.live += 1,
                    Record::Tombstone { .. } => counts.tombstones += 1,
                }
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct EntryCounts {
    pub live: usize,
    pub empty: usize,
    pub tombstones: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_accessors() {
        let fp = Fingerprint::from_value(5, 64);
        let live = Record::Live {
            fingerprint: fp,
            version: 3,
        };
        assert_eq!(live.version(), 3);
        assert_eq!(live.live(), Some(fp));

        let dead = Record::Tombstone { version: 4 };
        assert_eq!(dead.version(), 4);
        assert_eq!(dead.live(), None);
    }

    #[test]
    fn test_counts_and_lookup() {
        let map = EntryMap::new(4);
        {
            let mut shard = map.lock(1);
            shard.insert(
                1,
                Record::Live {
                    fingerprint: Fingerprint::from_value(9, 64),
                    version: 1,
                },
            );
        }
        map.lock(2).insert(
            2,
            Record::Live {
                fingerprint: Fingerprint::empty(64),
                version: 1,
            },
        );
        map.lock(3).insert(3, Record::Tombstone { version: 2 });

        assert_eq!(map.get(1).map(|fp| fp.value()), Some(9));
        assert_eq!(map.get(3), None);
        assert_eq!(
            map.counts(),
            EntryCounts {
                live: 2,
                empty: 1,
                tombstones: 1
            }
        );

        let mut seen = Vec::new();
        map.for_each_live(|id, _| seen.push(id));
        seen.sort_unstable();
        assert_eq!(seen, vec![1, 2]);
    }

    #[test]
    fn test_purge_respects_watermark() {
        let map = EntryMap::new(4);
        for id in 0..10u64 {
            map.lock(id).insert(id, Record::Tombstone { version: id });
        }
        map.lock(20).insert(
            20,
            Record::Live {
                fingerprint: Fingerprint::from_value(1, 64),
                version: 1,
            },
        );

        assert_eq!(map.purge_tombstones(4), 5);
        assert_eq!(map.counts().tombstones, 5);
        assert_eq!(map.record(4), None);
        assert_eq!(map.record(5), Some(Record::Tombstone { version: 5 }));
        // Live records are never touched, whatever their version.
        assert_eq!(map.purge_tombstones(u64::MAX), 5);
        assert_eq!(map.counts().live, 1);
    }
}
