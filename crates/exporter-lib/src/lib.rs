//! Accelerator occupancy accounting for Kubernetes clusters
//!
//! This crate provides the core functionality for:
//! - Fetching node and pod inventory from the API server
//! - Aggregating allocatable, capacity and allocated extended resources
//! - Publishing immutable snapshots on a fixed scan interval
//! - Rendering the current snapshot for Prometheus scrapes
//! - Health checks and observability

pub mod aggregator;
pub mod health;
pub mod inventory;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod publisher;

pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use metrics::MetricsFacade;
pub use models::*;
pub use observability::{ExporterMetrics, StructuredLogger};
pub use publisher::{SnapshotPublisher, SnapshotStore, SnapshotView};
