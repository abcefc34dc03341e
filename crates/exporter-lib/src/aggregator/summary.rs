//! Per-model accelerator totals
//!
//! Collapses a snapshot's per-node and per-pod entries into one figure per
//! (model, resource), the view a user picking an accelerator type needs.

use super::ResourceStatus;
use crate::models::{ModelSummary, OccupancySnapshot};
use std::collections::BTreeMap;

/// (model, resource) -> count
pub type ModelTotals = BTreeMap<(String, String), u64>;

/// Total `status` per (model, resource) across the cluster
pub fn count_by_model(status: ResourceStatus, snapshot: &OccupancySnapshot) -> ModelTotals {
    match status {
        ResourceStatus::Allocatable => sum_by_model(
            snapshot
                .allocatable
                .iter()
                .map(|e| (&e.model, &e.resource, e.count)),
        ),
        ResourceStatus::Capacity => sum_by_model(
            snapshot
                .capacity
                .iter()
                .map(|e| (&e.model, &e.resource, e.count)),
        ),
        ResourceStatus::Allocated => sum_by_model(
            snapshot
                .allocated
                .iter()
                .map(|e| (&e.model, &e.resource, e.count)),
        ),
    }
}

fn sum_by_model<'a>(counts: impl Iterator<Item = (&'a String, &'a String, u64)>) -> ModelTotals {
    let mut totals = ModelTotals::new();
    for (model, resource, count) in counts {
        let total = totals.entry((model.clone(), resource.clone())).or_insert(0);
        *total = total.saturating_add(count);
    }
    totals
}

/// Availability per (model, resource) present in any of the three series
pub fn summarize_models(snapshot: &OccupancySnapshot) -> Vec<ModelSummary> {
    let capacity = count_by_model(ResourceStatus::Capacity, snapshot);
    let allocatable = count_by_model(ResourceStatus::Allocatable, snapshot);
    let allocated = count_by_model(ResourceStatus::Allocated, snapshot);

    let mut keys: Vec<&(String, String)> = capacity
        .keys()
        .chain(allocatable.keys())
        .chain(allocated.keys())
        .collect();
    keys.sort();
    keys.dedup();

    keys.into_iter()
        .map(|key| {
            let capacity = capacity.get(key).copied().unwrap_or(0);
            let allocatable = allocatable.get(key).copied().unwrap_or(0);
            let allocated = allocated.get(key).copied().unwrap_or(0);
            ModelSummary {
                model: key.0.clone(),
                resource: key.1.clone(),
                capacity,
                allocatable,
                allocated,
                available: allocatable.saturating_sub(allocated),
            }
        })
        .collect()
}
