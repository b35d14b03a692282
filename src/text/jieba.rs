//! Dictionary/HMM segmentation for Chinese text via `jieba-rs`.

use super::{is_content_token, StopWords, Tokenizer};
use jieba_rs::Jieba;

/// Tokenizer backed by the jieba segmentation model.
///
/// Loading the bundled dictionary is expensive; build one instance and share
/// it behind an `Arc`.
pub struct JiebaTokenizer {
    jieba: Jieba,
    stopwords: StopWords,
    hmm: bool,
    version: String,
}

impl JiebaTokenizer {
    pub fn new() -> Self {
        Self::with_stopwords(StopWords::default())
    }

    pub fn with_stopwords(stopwords: StopWords) -> Self {
        let version = format!("jieba-0.7-hmm+{}", stopwords.name());
        Self {
            jieba: Jieba::new(),
            stopwords,
            hmm: true,
            version,
        }
    }
}

impl Default for JiebaTokenizer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JiebaTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JiebaTokenizer")
            .field("hmm", &self.hmm)
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

impl Tokenizer for JiebaTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        self.jieba
            .cut(text, self.hmm)
            .into_iter()
            .filter(|t| is_content_token(t))
            .map(str::to_lowercase)
            .filter(|t| !self.stopwords.contains(t))
            .collect()
    }

    fn version(&self) -> &str {
        &self.version
    }
}
