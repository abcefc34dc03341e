//! Core data models for the occupancy exporter
//!
//! Node and pod records are scan-scoped: they are rebuilt from the API
//! response at the start of every scan and dropped once aggregation is done.
//! An [`OccupancySnapshot`] is the only value that outlives a scan.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Model name used when a node carries no model label
pub const GENERIC_MODEL: &str = "Generic";

/// Resource name -> raw quantity string as reported by the API server
pub type ResourceList = BTreeMap<String, String>;

/// A cluster node as seen by one scan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub allocatable: ResourceList,
    pub capacity: ResourceList,
}

impl NodeRecord {
    /// Resolve the accelerator model from `label_key`, falling back to "Generic"
    pub fn model(&self, label_key: &str) -> &str {
        self.labels
            .get(label_key)
            .map(String::as_str)
            .unwrap_or(GENERIC_MODEL)
    }
}

/// Resource declarations of a single container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerClaim {
    pub limits: Option<ResourceList>,
    pub requests: Option<ResourceList>,
}

/// A pod and the resources its containers claim
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodClaim {
    pub namespace: String,
    pub name: String,
    /// Owning node; `None` while the pod is still unscheduled
    pub node_name: Option<String>,
    /// Pod phase (`Pending`, `Running`, `Succeeded`, ...)
    pub phase: Option<String>,
    pub containers: Vec<ContainerClaim>,
}

impl PodClaim {
    /// Pods that ran to completion no longer hold their resources
    pub fn is_terminated(&self) -> bool {
        matches!(self.phase.as_deref(), Some("Succeeded") | Some("Failed"))
    }
}

/// Allocatable (or capacity) count of one resource on one node
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocatableEntry {
    pub node: String,
    pub model: String,
    pub resource: String,
    pub count: u64,
}

/// Count of one resource claimed by one pod
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AllocatedEntry {
    pub node: String,
    pub model: String,
    pub resource: String,
    pub namespace: String,
    pub pod: String,
    pub count: u64,
}

/// One immutable, fully-formed result of a completed scan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OccupancySnapshot {
    pub timestamp: DateTime<Utc>,
    pub scan_duration: Duration,
    pub allocatable: Vec<AllocatableEntry>,
    pub capacity: Vec<AllocatableEntry>,
    pub allocated: Vec<AllocatedEntry>,
}

/// Per-model availability derived from a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub model: String,
    pub resource: String,
    pub capacity: u64,
    pub allocatable: u64,
    pub allocated: u64,
    pub available: u64,
}
