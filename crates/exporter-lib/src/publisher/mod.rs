//! Scan-on-interval loop and snapshot publication
//!
//! One background task per process drives `Idle -> Scanning -> Aggregating
//! -> Publishing -> Idle` and is the only writer of the [`SnapshotStore`].
//! Any failure drops back to `Idle` without touching the published snapshot.

mod r#loop;
mod store;

pub use r#loop::{
    ScanConfig, ScanError, ScanState, SnapshotPublisher, SnapshotPublisherBuilder,
};
pub use store::{SnapshotStore, SnapshotView};
