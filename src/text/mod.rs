//! Text segmentation into tokens.
//!
//! Everything downstream (hashing, fingerprints, the index) only sees the
//! [`Tokenizer`] capability, so a different language model can be swapped in
//! without touching any other component. Two implementations ship:
//!
//! | Tokenizer | Segmentation | Scripts |
//! |-----------|--------------|---------|
//! | [`UnicodeTokenizer`] | UAX#29 word boundaries | Space-delimited scripts; ideographs one per token |
//! | `JiebaTokenizer` (feature `jieba`) | Dictionary + HMM model | Chinese mixed with Latin |
//!
//! Output is lowercased with stopwords removed. Empty or whitespace-only input
//! yields an empty sequence; that is not an error.
//!
//! For Chinese (or mixed Chinese/Latin) corpora use `JiebaTokenizer`. The
//! `jieba` feature is on by default; `UnicodeTokenizer` treats every ideograph
//! as a separate word, which loses multi-character vocabulary.

#[cfg(feature = "jieba")]
mod jieba;
mod stopwords;

#[cfg(feature = "jieba")]
pub use jieba::JiebaTokenizer;
pub use stopwords::StopWords;

use unicode_segmentation::UnicodeSegmentation;

/// Text segmentation capability.
///
/// Implementations must be deterministic for a fixed [`Tokenizer::version`]:
/// fingerprints computed under different versions are not comparable.
pub trait Tokenizer: Send + Sync {
    /// Segment `text` into an ordered token sequence, stopwords removed.
    fn tokenize(&self, text: &str) -> Vec<String>;

    /// Identifier pinned into the index configuration.
    fn version(&self) -> &str;
}

/// Tokenizer based on Unicode word boundaries (UAX#29).
///
/// Works without any model data. Scripts without explicit word boundaries
/// degrade to one token per ideograph, which still gives simhash useful
/// overlap signal but is no substitute for `JiebaTokenizer` on CJK text.
#[derive(Debug, Clone)]
pub struct UnicodeTokenizer {
    stopwords: StopWords,
    version: String,
}

impl UnicodeTokenizer {
    pub fn new() -> Self {
        Self::with_stopwords(StopWords::default())
    }

    pub fn with_stopwords(stopwords: StopWords) -> Self {
        let version = format!("uax29-1+{}", stopwords.name());
        Self { stopwords, version }
    }

    pub fn stopwords(&self) -> &StopWords {
        &self.stopwords
    }
}

impl Default for UnicodeTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokenizer for UnicodeTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        text.unicode_words()
            .filter(|word| is_content_token(word))
            .map(str::to_lowercase)
            .filter(|word| !self.stopwords.contains(word))
            .collect()
    }

    fn version(&self) -> &str {
        &self.version
    }
}

/// True if `token` carries any letter or digit.
///
/// Model-based segmenters emit punctuation and whitespace runs as tokens;
/// connector-only words such as `___` are dropped too.
pub(crate) fn is_content_token(token: &str) -> bool {
    token.chars().any(char::is_alphanumeric)
}
