//! Stopword lists.

use std::collections::HashSet;
use std::sync::Arc;

const ENGLISH: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];

const CHINESE: &[&str] = &[
    "的", "了", "是", "在", "和", "与", "及", "或", "也", "就", "都", "而", "之", "着", "把", "被",
    "这", "那", "我", "你", "他", "她", "它",
];

/// An immutable, cheaply clonable stopword set.
///
/// The `name` becomes part of the tokenizer version, because changing the
/// list changes every fingerprint.
#[derive(Debug, Clone)]
pub struct StopWords {
    name: Arc<str>,
    words: Arc<HashSet<String>>,
}

impl StopWords {
    /// Build a custom list. Words are matched after lowercasing.
    pub fn new<I, S>(name: &str, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            name: Arc::from(name),
            words: Arc::new(
                words
                    .into_iter()
                    .map(|w| w.as_ref().to_lowercase())
                    .collect(),
            ),
        }
    }

    /// No stopwords at all.
    pub fn none() -> Self {
        Self::new("none", std::iter::empty::<&str>())
    }

    /// English articles, conjunctions and prepositions.
    pub fn english() -> Self {
        Self::new("en-1", ENGLISH)
    }

    /// English plus common Chinese function words.
    pub fn english_chinese() -> Self {
        Self::new("en-zh-1", ENGLISH.iter().chain(CHINESE))
    }

    pub fn contains(&self, word: &str) -> bool {
        self.words.contains(word)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Default for StopWords {
    fn default() -> Self {
        Self::english_chinese()
    }
}
