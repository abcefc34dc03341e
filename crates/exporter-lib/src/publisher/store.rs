//! Single-writer snapshot publication
//!
//! The store holds at most one [`OccupancySnapshot`] behind an atomically
//! swapped reference. Readers take one lock-free load and then work on an
//! immutable value; the writer installs a fully built snapshot with one
//! store, so no reader ever sees a partial result.

use crate::models::OccupancySnapshot;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// What a reader finds when it looks at the store
#[derive(Debug, Clone)]
pub enum SnapshotView {
    /// The last successfully published snapshot
    Ready(Arc<OccupancySnapshot>),
    /// No scan has completed yet
    NoDataYet,
}

impl SnapshotView {
    pub fn snapshot(&self) -> Option<&Arc<OccupancySnapshot>> {
        match self {
            SnapshotView::Ready(snapshot) => Some(snapshot),
            SnapshotView::NoDataYet => None,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, SnapshotView::Ready(_))
    }
}

/// Process-wide holder of the published snapshot
///
/// Created once at startup and handed explicitly to the scan task (the only
/// writer) and to the metrics facade.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    current: ArcSwapOption<OccupancySnapshot>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    /// Load the current snapshot without blocking
    pub fn current(&self) -> SnapshotView {
        match self.current.load_full() {
            Some(snapshot) => SnapshotView::Ready(snapshot),
            None => SnapshotView::NoDataYet,
        }
    }

    /// Replace the published snapshot, returning the previous one
    ///
    /// Readers still holding the previous snapshot keep a valid reference
    /// until they drop it.
    pub fn publish(
        &self,
        snapshot: impl Into<Arc<OccupancySnapshot>>,
    ) -> Option<Arc<OccupancySnapshot>> {
        self.current.swap(Some(snapshot.into()))
    }
}
