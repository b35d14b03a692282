//! Lookup-table hasher for fixtures and reproducible examples.

use super::{TokenHasher, Xxh64Hasher};
use std::collections::HashMap;

/// Hasher with explicitly assigned values per token.
///
/// Tokens missing from the table fall back to xxHash64, so a table can pin a
/// handful of tokens without having to enumerate a vocabulary.
#[derive(Debug, Clone)]
pub struct TableHasher {
    table: HashMap<String, u64>,
    fallback: Xxh64Hasher,
    version: String,
}

impl TableHasher {
    pub fn new<I, S>(version: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            table: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
            fallback: Xxh64Hasher::new(),
            version: format!("table-{version}"),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl TokenHasher for TableHasher {
    fn hash(&self, token: &str) -> u64 {
        match self.table.get(token) {
            Some(&h) => h,
            None => self.fallback.hash(token),
        }
    }

    fn version(&self) -> &str {
        &self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_lookup_and_fallback() {
        let h = TableHasher::new("t", [("fox", 0b1010u64)]);
        assert_eq!(h.hash("fox"), 0b1010);
        assert_eq!(h.hash("dog"), Xxh64Hasher::new().hash("dog"));
        assert_eq!(h.version(), "table-t");
        assert_eq!(h.len(), 1);
    }
}
