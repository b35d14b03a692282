//! Index lifecycle state machine.
//!
//! ```text
//!            insert/update              refresh ok
//!  Empty ───────────────────▶ Ready ◀──────────── Building
//!    │                        │  ▲                  ▲
//!    │                        │  │ refresh ok       │ refresh
//!    │      mutation failed   ▼  │                  │
//!    └──────────────────────▶ Stale ────────────────┘
//! ```
//!
//! A failed refresh returns to whatever state preceded `Building`. Stale
//! indices keep serving their last-known-good contents; callers see the
//! staleness flag on every result.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a [`crate::SimilarityIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexState {
    /// Nothing inserted yet.
    Empty,
    /// A refresh is building a new generation; queries use the old one.
    Building,
    /// Contents reflect every applied mutation.
    Ready,
    /// Some mutation could not be applied; results may be out of date.
    Stale,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexState::Empty => "empty",
            IndexState::Building => "building",
            IndexState::Ready => "ready",
            IndexState::Stale => "stale",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
struct Inner {
    current: IndexState,
    /// State to return to if the running build fails.
    before_build: IndexState,
    /// A mutation failed while building; the published result is suspect.
    stale_during_build: bool,
}

#[derive(Debug)]
pub(crate) struct StateCell {
    inner: Mutex<Inner>,
}

impl StateCell {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: IndexState::Empty,
                before_build: IndexState::Empty,
                stale_during_build: false,
            }),
        }
    }

    pub(crate) fn get(&self) -> IndexState {
        self.inner.lock().current
    }

    /// A state reflecting stored results for readers: `Building` reports what
    /// the serving generation was before the build started.
    pub(crate) fn serving(&self) -> IndexState {
        let inner = self.inner.lock();
        match inner.current {
            IndexState::Building if inner.stale_during_build => IndexState::Stale,
            IndexState::Building => inner.before_build,
            other => other,
        }
    }

    pub(crate) fn on_upsert(&self) {
        let mut inner = self.inner.lock();
        if inner.current == IndexState::Empty {
            inner.current = IndexState::Ready;
        }
        if inner.before_build == IndexState::Empty && inner.current == IndexState::Building {
            inner.before_build = IndexState::Ready;
        }
    }

    pub(crate) fn mark_stale(&self) {
        let mut inner = self.inner.lock();
        match inner.current {
            IndexState::Building => inner.stale_during_build = true,
            _ => inner.current = IndexState::Stale,
        }
    }

    pub(crate) fn begin_build(&self) {
        let mut inner = self.inner.lock();
        inner.before_build = inner.current;
        inner.stale_during_build = false;
        inner.current = IndexState::Building;
    }

    pub(crate) fn finish_build(&self, published: bool) -> IndexState {
        let mut inner = self.inner.lock();
        inner.current = match (published, inner.stale_during_build) {
            (_, true) => IndexState::Stale,
            (true, false) => IndexState::Ready,
            (false, false) => inner.before_build,
        };
        inner.stale_during_build = false;
        inner.current
    }
}
