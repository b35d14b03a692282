//! Chunked parallel fingerprinting of a content stream.

use super::pipeline::Pipeline;
use super::source::ContentStream;
use crate::error::Result;
use crate::fingerprint::Fingerprint;
use crate::index::EntityId;
use rayon::prelude::*;

/// Pairs pulled from the source per parallel batch.
pub(crate) const CHUNK_SIZE: usize = 1024;

/// Adapts `(id, content)` pairs into `(id, fingerprint)` pairs.
///
/// Content is pulled in chunks and tokenized on the rayon pool, which keeps
/// memory bounded for large corpora. A source error is yielded after the
/// already-pulled pairs of its chunk, then the stream ends.
pub(crate) struct FingerprintStream<'a> {
    pipeline: &'a Pipeline,
    source: ContentStream<'a>,
    ready: std::vec::IntoIter<Result<(EntityId, Fingerprint)>>,
    done: bool,
    warn_empty: bool,
}

impl<'a> FingerprintStream<'a> {
    pub(crate) fn new(pipeline: &'a Pipeline, source: ContentStream<'a>) -> Self {
        Self {
            pipeline,
            source,
            ready: Vec::new().into_iter(),
            done: false,
            warn_empty: true,
        }
    }

    /// Do not log degraded content (used by diagnostics that re-read everything).
    pub(crate) fn quiet(mut self) -> Self {
        self.warn_empty = false;
        self
    }

    fn refill(&mut self) {
        let mut batch = Vec::with_capacity(CHUNK_SIZE);
        let mut error = None;
        while batch.len() < CHUNK_SIZE {
            match self.source.next() {
                Some(Ok(pair)) => batch.push(pair),
                Some(Err(e)) => {
                    error = Some(e);
                    self.done = true;
                    break;
                }
                None => {
                    self.done = true;
                    break;
                }
            }
        }

        let pipeline = self.pipeline;
        let warn_empty = self.warn_empty;
        let mut out: Vec<Result<(EntityId, Fingerprint)>> = batch
            .into_par_iter()
            .map(|(id, text)| {
                let fp = pipeline.fingerprint(&text);
                if warn_empty && fp.is_empty() {
                    tracing::warn!(id, "content produced no tokens; excluded from matching");
                }
                Ok((id, fp))
            })
            .collect();
        if let Some(e) = error {
            out.push(Err(e));
        }
        self.ready = out.into_iter();
    }
}

impl Iterator for FingerprintStream<'_> {
    type Item = Result<(EntityId, Fingerprint)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.ready.next() {
                return Some(item);
            }
            if self.done {
                return None;
            }
            self.refill();
        }
    }
}
