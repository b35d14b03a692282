//! Exact-match tables keyed by one fingerprint slice.

use super::EntityId;
use parking_lot::RwLock;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Ids sharing one slice value. Most slots hold very few ids.
pub(crate) type SlotIds = SmallVec<[EntityId; 4]>;

type Shard = HashMap<u64, SlotIds>;

#[inline]
pub(crate) fn shard_of(key: u64, shards: usize) -> usize {
    // Fibonacci hashing: slice values are often dense in the low bits.
    (key.wrapping_mul(0x9e37_79b9_7f4a_7c15) >> 32) as usize % shards
}

/// One of the `P` partition tables.
///
/// Maps the value of bits `[partition * B, (partition + 1) * B)` to the ids
/// whose current fingerprint has that slice. The slot space is split over
/// independently locked shards so writers touching different slots do not
/// contend.
#[derive(Debug)]
pub struct PartitionTable {
    partition: u32,
    shards: Box<[RwLock<Shard>]>,
}

impl PartitionTable {
    pub fn new(partition: u32, shards: usize) -> Self {
        Self {
            partition,
            shards: (0..shards.max(1)).map(|_| RwLock::new(Shard::new())).collect(),
        }
    }

    /// Build from pre-grouped slots without taking any locks.
    pub(crate) fn from_slots(partition: u32, shards: usize, slots: HashMap<u64, SlotIds>) -> Self {
        let n = shards.max(1);
        let mut split: Vec<Shard> = (0..n).map(|_| Shard::new()).collect();
        for (key, ids) in slots {
            split[shard_of(key, n)].insert(key, ids);
        }
        Self {
            partition,
            shards: split.into_iter().map(RwLock::new).collect(),
        }
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    #[inline]
    fn shard(&self, key: u64) -> &RwLock<Shard> {
        &self.shards[shard_of(key, self.shards.len())]
    }

    /// Add `id` to the slot for `key`. Returns false if it was already there.
    pub fn insert(&self, key: u64, id: EntityId) -> bool {
        let mut shard = self.shard(key).write();
        let ids = shard.entry(key).or_default();
        if ids.contains(&id) {
            false
        } else {
            ids.push(id);
            true
        }
    }

    /// Remove `id` from the slot for `key`, dropping the slot when it empties.
    pub fn remove(&self, key: u64, id: EntityId) -> bool {
        let mut shard = self.shard(key).write();
        let Some(ids) = shard.get_mut(&key) else {
            return false;
        };
        let Some(pos) = ids.iter().position(|&x| x == id) else {
            return false;
        };
        ids.swap_remove(pos);
        if ids.is_empty() {
            shard.remove(&key);
        }
        true
    }

    /// Append every id in the slot for `key` to `out`.
    pub fn collect_into(&self, key: u64, out: &mut Vec<EntityId>) {
        if let Some(ids) = self.shard(key).read().get(&key) {
            out.extend_from_slice(ids);
        }
    }

    pub fn contains(&self, key: u64, id: EntityId) -> bool {
        self.shard(key)
            .read()
            .get(&key)
            .is_some_and(|ids| ids.contains(&id))
    }

    /// Number of distinct slice values present.
    pub fn key_count(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    /// Total (slot, id) memberships.
    pub fn membership_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().values().map(SmallVec::len).sum::<usize>())
            .sum()
    }

    /// Size of the most crowded slot; a proxy for worst-case candidate cost.
    pub fn largest_slot(&self) -> usize {
        self.shards
            .iter()
            .filter_map(|s| s.read().values().map(SmallVec::len).max())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_remove() {
        let table = PartitionTable::new(0, 4);
        assert!(table.insert(7, 1));
        assert!(!table.insert(7, 1));
        assert!(table.insert(7, 2));
        assert!(table.contains(7, 1));

        let mut out = Vec::new();
        table.collect_into(7, &mut out);
        out.sort_unstable();
        assert_eq!(out, vec![1, 2]);

        assert!(table.remove(7, 1));
        assert!(!table.remove(7, 1));
        assert!(table.remove(7, 2));
        assert_eq!(table.key_count(), 0);
    }

    #[test]
    fn test_missing_key() {
        let table = PartitionTable::new(0, 4);
        let mut out = Vec::new();
        table.collect_into(42, &mut out);
        assert!(out.is_empty());
        assert!(!table.remove(42, 1));
    }

    #[test]
    fn test_counts() {
        let table = PartitionTable::new(3, 2);
        for id in 0..10 {
            table.insert(id % 3, id);
        }
        assert_eq!(table.partition(), 3);
        assert_eq!(table.key_count(), 3);
        assert_eq!(table.membership_count(), 10);
        assert_eq!(table.largest_slot(), 4);
    }

    #[test]
    fn test_from_slots_matches_incremental() {
        let mut slots: HashMap<u64, SlotIds> = HashMap::new();
        for id in 0..50u64 {
            slots.entry(id % 7).or_default().push(id);
        }
        let table = PartitionTable::from_slots(0, 8, slots);
        for id in 0..50u64 {
            assert!(table.contains(id % 7, id));
        }
        assert_eq!(table.membership_count(), 50);
    }
}
