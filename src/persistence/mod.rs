//! Optional snapshotting of index contents.
//!
//! The index is an in-memory structure; the authoritative store for content is
//! always an external collaborator. Snapshots let a process warm-start without
//! re-tokenizing the whole corpus. They pin the configuration, including the
//! tokenizer and hasher versions, and refuse to load into an engine whose
//! pipeline would produce different fingerprints.

pub mod error;
pub mod format;
pub mod snapshot;

pub use error::{PersistenceError, PersistenceResult};
pub use snapshot::Snapshot;
