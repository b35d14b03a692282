//! Off-to-the-side construction of a complete generation.

use super::entries::{EntryMap, Record};
use super::partition::{PartitionTable, SlotIds};
use super::{EntityId, Generation, Layout, BASELINE_VERSION};
use crate::error::{RecommendError, Result};
use crate::fingerprint::Fingerprint;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag for long-running refreshes.
///
/// Clones share the flag. A cancelled refresh never publishes, so the prior
/// generation stays authoritative.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RecommendError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Accumulates entries, then builds all partition tables at once.
#[derive(Debug)]
pub(crate) struct GenerationBuilder {
    layout: Layout,
    records: HashMap<EntityId, Record>,
    empty: usize,
}

impl GenerationBuilder {
    pub(crate) fn new(layout: Layout) -> Self {
        Self {
            layout,
            records: HashMap::new(),
            empty: 0,
        }
    }

    /// Add or replace an entry. Later pairs for the same id win.
    pub(crate) fn insert(&mut self, id: EntityId, fingerprint: Fingerprint) {
        let previous = self.records.insert(
            id,
            Record::Live {
                fingerprint,
                version: BASELINE_VERSION,
            },
        );
        if previous.and_then(|r| r.live()).is_some_and(|fp| fp.is_empty()) {
            self.empty -= 1;
        }
        if fingerprint.is_empty() {
            self.empty += 1;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    pub(crate) fn empty_count(&self) -> usize {
        self.empty
    }

    /// Build the `P` tables in parallel, checking `cancel` before each one.
    pub(crate) fn build(self, number: u64, cancel: &CancelToken) -> Result<Generation> {
        let Layout {
            partitions,
            slice_width,
            shards,
            ..
        } = self.layout;
        let records = &self.records;

        let tables = (0..partitions)
            .into_par_iter()
            .map(|p| {
                cancel.check()?;
                let mut slots: HashMap<u64, SlotIds> = HashMap::new();
                for (&id, record) in records {
                    if let Some(fp) = record.live().filter(|fp| !fp.is_empty()) {
                        slots.entry(fp.slice(p, slice_width)).or_default().push(id);
                    }
                }
                Ok(PartitionTable::from_slots(p, shards, slots))
            })
            .collect::<Result<Vec<_>>>()?;

        cancel.check()?;
        Ok(Generation {
            number,
            entries: EntryMap::from_records(shards, self.records),
            tables,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> Layout {
        Layout {
            width: 64,
            partitions: 4,
            slice_width: 16,
            shards: 4,
        }
    }

    #[test]
    fn test_build_places_every_slice() {
        let mut builder = GenerationBuilder::new(layout());
        let fp = Fingerprint::from_value(0x0004_0003_0002_0001, 64);
        builder.insert(9, fp);
        builder.insert(10, Fingerprint::empty(64));
        assert_eq!(builder.len(), 2);
        assert_eq!(builder.empty_count(), 1);

        let generation = builder.build(1, &CancelToken::new()).unwrap();
        for (p, table) in generation.tables.iter().enumerate() {
            assert!(table.contains(p as u64 + 1, 9));
            assert_eq!(table.membership_count(), 1);
        }
        assert_eq!(generation.entries.get(10), Some(Fingerprint::empty(64)));
    }

    #[test]
    fn test_later_insert_wins() {
        let mut builder = GenerationBuilder::new(layout());
        builder.insert(1, Fingerprint::empty(64));
        builder.insert(1, Fingerprint::from_value(7, 64));
        assert_eq!(builder.empty_count(), 0);
        let generation = builder.build(1, &CancelToken::new()).unwrap();
        assert_eq!(generation.entries.get(1).map(|f| f.value()), Some(7));
    }

    #[test]
    fn test_cancelled_build() {
        let mut builder = GenerationBuilder::new(layout());
        builder.insert(1, Fingerprint::from_value(7, 64));
        let cancel = CancelToken::new();
        cancel.cancel();
        assert!(matches!(
            builder.build(1, &cancel),
            Err(RecommendError::Cancelled)
        ));
    }
}
