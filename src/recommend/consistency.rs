//! Index/store divergence reports.

use crate::index::EntityId;
use serde::{Deserialize, Serialize};

/// Differences between the authoritative store and the serving index.
///
/// Divergence is never fatal; the next full refresh repairs it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsistencyReport {
    /// Ids compared.
    pub checked: usize,
    /// In the store, absent from the index.
    pub missing_from_index: Vec<EntityId>,
    /// In the index, absent from the store.
    pub missing_from_store: Vec<EntityId>,
    /// Present in both, but the indexed fingerprint no longer matches content.
    pub outdated: Vec<EntityId>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.missing_from_index.is_empty()
            && self.missing_from_store.is_empty()
            && self.outdated.is_empty()
    }

    /// Total number of divergent ids.
    pub fn divergent(&self) -> usize {
        self.missing_from_index.len() + self.missing_from_store.len() + self.outdated.len()
    }
}
