//! Text → fingerprint pipeline.

use crate::fingerprint::{Fingerprint, FingerprintBuilder};
use crate::hash::weigh;
use crate::text::Tokenizer;
use std::sync::Arc;

/// Tokenizer plus fingerprint builder, pinned to one version pair.
#[derive(Clone)]
pub struct Pipeline {
    tokenizer: Arc<dyn Tokenizer>,
    builder: FingerprintBuilder,
}

impl Pipeline {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, builder: FingerprintBuilder) -> Self {
        Self { tokenizer, builder }
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    pub fn builder(&self) -> &FingerprintBuilder {
        &self.builder
    }

    pub fn tokenize(&self, text: &str) -> Vec<String> {
        self.tokenizer.tokenize(text)
    }

    pub fn fingerprint(&self, text: &str) -> Fingerprint {
        self.builder.build(&weigh(self.tokenize(text)))
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("tokenizer", &self.tokenizer.version())
            .field("builder", &self.builder)
            .finish()
    }
}
