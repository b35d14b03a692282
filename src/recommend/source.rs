//! The authoritative content store, as seen by the engine.

use crate::error::Result;
use crate::index::EntityId;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Lazily produced `(id, content)` pairs. An `Err` item aborts the enumeration.
pub type ContentStream<'a> = Box<dyn Iterator<Item = Result<(EntityId, String)>> + 'a>;

/// External collaborator owning entity content.
///
/// Implementations apply their own timeouts; the engine never retries.
/// Failures should be reported as [`crate::RecommendError::Source`].
pub trait ContentSource: Send + Sync {
    /// Current content for `id`, or `None` if the entity does not exist.
    fn fetch(&self, id: EntityId) -> Result<Option<String>>;

    /// Enumerate every entity. Drives full refresh and consistency checks.
    fn scan(&self) -> Result<ContentStream<'_>>;
}

/// In-memory content store.
///
/// Useful for tests and for services that keep their corpus in memory.
#[derive(Debug, Default)]
pub struct MemorySource {
    entries: RwLock<BTreeMap<EntityId, String>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, id: EntityId, content: impl Into<String>) {
        self.entries.write().insert(id, content.into());
    }

    pub fn remove(&self, id: EntityId) -> Option<String> {
        self.entries.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl<S: Into<String>> FromIterator<(EntityId, S)> for MemorySource {
    fn from_iter<T: IntoIterator<Item = (EntityId, S)>>(iter: T) -> Self {
        Self {
            entries: RwLock::new(iter.into_iter().map(|(id, s)| (id, s.into())).collect()),
        }
    }
}

impl ContentSource for MemorySource {
    fn fetch(&self, id: EntityId) -> Result<Option<String>> {
        Ok(self.entries.read().get(&id).cloned())
    }

    fn scan(&self) -> Result<ContentStream<'_>> {
        // Copy out so no lock is held while the caller tokenizes.
        let entries: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(&id, s)| (id, s.clone()))
            .collect();
        Ok(Box::new(entries.into_iter().map(Ok)))
    }
}
