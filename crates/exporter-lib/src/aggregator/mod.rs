//! Resource occupancy aggregation
//!
//! Pure functions that turn one scan's node and pod inventory into
//! allocatable, capacity and allocated entries. Nothing here performs I/O;
//! entry-scoped problems are returned as [`Anomaly`] values for the caller
//! to log, and never abort the computation.
//!
//! Output ordering is stable: entries are sorted by node, then resource,
//! then namespace and pod.

mod quantity;
mod summary;


pub use quantity::{parse_quantity, QuantityError};
pub use summary::{count_by_model, summarize_models};

use crate::models::{
    AllocatableEntry, AllocatedEntry, ContainerClaim, NodeRecord, PodClaim, ResourceList,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Which resource figure of the cluster to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceStatus {
    /// What nodes report as schedulable
    Allocatable,
    /// What nodes physically provide
    Capacity,
    /// What running pods have claimed
    Allocated,
}

/// Static inputs of the aggregation
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    /// Extended resources to count (e.g. `nvidia.com/gpu`)
    pub tracked_resources: Vec<String>,
    /// Namespaces whose pods are counted as allocations
    pub monitored_namespaces: BTreeSet<String>,
    /// Node label holding the accelerator model
    pub model_label_key: String,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            tracked_resources: vec!["nvidia.com/gpu".to_string()],
            monitored_namespaces: BTreeSet::from(["default".to_string()]),
            model_label_key: "nvidia.com/product".to_string(),
        }
    }
}

/// Where a rejected quantity was read from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuantitySource {
    Node { node: String },
    Pod { namespace: String, pod: String },
}

impl fmt::Display for QuantitySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuantitySource::Node { node } => write!(f, "node/{}", node),
            QuantitySource::Pod { namespace, pod } => write!(f, "pod/{}/{}", namespace, pod),
        }
    }
}

/// Entry-scoped problem found while aggregating
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Anomaly {
    /// A quantity could not be read as a whole count and was taken as 0
    Quantity {
        source: QuantitySource,
        resource: String,
        raw: String,
        error: QuantityError,
    },
    /// A pod names a node that is absent from the current node listing
    StaleNodeReference {
        namespace: String,
        pod: String,
        node: String,
    },
}

impl Anomaly {
    pub fn kind(&self) -> &'static str {
        match self {
            Anomaly::Quantity { .. } => "aggregation_anomaly",
            Anomaly::StaleNodeReference { .. } => "stale_node_reference",
        }
    }
}

/// Entries produced by one aggregation pass plus the anomalies met on the way
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tally<T> {
    pub entries: Vec<T>,
    pub anomalies: Vec<Anomaly>,
}

impl<T> Default for Tally<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            anomalies: Vec::new(),
        }
    }
}

/// Index nodes by name; on duplicate names the first record wins
pub fn index_nodes(nodes: &[NodeRecord]) -> BTreeMap<&str, &NodeRecord> {
    let mut index = BTreeMap::new();
    for node in nodes {
        index.entry(node.name.as_str()).or_insert(node);
    }
    index
}

/// Count allocatable tracked resources per node
pub fn compute_allocatable(
    nodes: &[NodeRecord],
    tracked_resources: &[String],
    model_label_key: &str,
) -> Tally<AllocatableEntry> {
    count_node_resources(
        nodes,
        tracked_resources,
        model_label_key,
        |node| &node.allocatable,
    )
}

/// Count tracked resource capacity per node
pub fn compute_capacity(
    nodes: &[NodeRecord],
    tracked_resources: &[String],
    model_label_key: &str,
) -> Tally<AllocatableEntry> {
    count_node_resources(nodes, tracked_resources, model_label_key, |node| {
        &node.capacity
    })
}

fn count_node_resources(
    nodes: &[NodeRecord],
    tracked_resources: &[String],
    model_label_key: &str,
    resources_of: impl Fn(&NodeRecord) -> &ResourceList,
) -> Tally<AllocatableEntry> {
    let mut tally = Tally::default();

    let tracked = distinct(tracked_resources);

    for (name, node) in index_nodes(nodes) {
        let resources = resources_of(node);

        for &resource in &tracked {
            let Some(raw) = resources.get(resource) else {
                continue;
            };

            let count = parse_or_record(
                raw,
                resource,
                || QuantitySource::Node {
                    node: name.to_string(),
                },
                &mut tally.anomalies,
            );

            if count > 0 {
                tally.entries.push(AllocatableEntry {
                    node: name.to_string(),
                    model: node.model(model_label_key).to_string(),
                    resource: resource.to_string(),
                    count,
                });
            }
        }
    }

    tally.entries.sort();
    tally
}

/// Sum tracked resources claimed by pods in monitored namespaces
///
/// Each container contributes its limit for a resource when one is
/// declared, otherwise its request, otherwise nothing. Pods without a node
/// or in a terminal phase are skipped; pods naming an unknown node are
/// skipped and reported as [`Anomaly::StaleNodeReference`].
pub fn compute_allocated(
    nodes: &[NodeRecord],
    pods: &[PodClaim],
    config: &AggregationConfig,
) -> Tally<AllocatedEntry> {
    let index = index_nodes(nodes);
    let tracked = distinct(&config.tracked_resources);
    let mut anomalies = Vec::new();
    let mut totals: BTreeMap<(&str, &str, &str, &str), (u64, &str)> = BTreeMap::new();

    for pod in pods {
        if !config.monitored_namespaces.contains(&pod.namespace) || pod.is_terminated() {
            continue;
        }
        let Some(node_name) = pod.node_name.as_deref() else {
            continue;
        };
        let Some(node) = index.get(node_name) else {
            anomalies.push(Anomaly::StaleNodeReference {
                namespace: pod.namespace.clone(),
                pod: pod.name.clone(),
                node: node_name.to_string(),
            });
            continue;
        };
        let model = node.model(&config.model_label_key);

        for &resource in &tracked {
            let count = pod
                .containers
                .iter()
                .map(|container| container_claim(container, pod, resource, &mut anomalies))
                .fold(0u64, u64::saturating_add);

            if count == 0 {
                continue;
            }

            let key = (
                node.name.as_str(),
                resource,
                pod.namespace.as_str(),
                pod.name.as_str(),
            );
            let slot = totals.entry(key).or_insert((0, model));
            slot.0 = slot.0.saturating_add(count);
        }
    }

    let entries = totals
        .into_iter()
        .map(
            |((node, resource, namespace, pod), (count, model))| AllocatedEntry {
                node: node.to_string(),
                model: model.to_string(),
                resource: resource.to_string(),
                namespace: namespace.to_string(),
                pod: pod.to_string(),
                count,
            },
        )
        .collect();

    Tally { entries, anomalies }
}

/// Tracked resource names without repeats, in sorted order
fn distinct(tracked_resources: &[String]) -> BTreeSet<&str> {
    tracked_resources.iter().map(String::as_str).collect()
}

/// Contribution of one container to a pod's total for `resource`
fn container_claim(
    container: &ContainerClaim,
    pod: &PodClaim,
    resource: &str,
    anomalies: &mut Vec<Anomaly>,
) -> u64 {
    let limit = container.limits.as_ref().and_then(|l| l.get(resource));
    let request = container.requests.as_ref().and_then(|r| r.get(resource));

    match limit.or(request) {
        Some(raw) => parse_or_record(
            raw,
            resource,
            || QuantitySource::Pod {
                namespace: pod.namespace.clone(),
                pod: pod.name.clone(),
            },
            anomalies,
        ),
        None => 0,
    }
}

fn parse_or_record(
    raw: &str,
    resource: &str,
    source: impl FnOnce() -> QuantitySource,
    anomalies: &mut Vec<Anomaly>,
) -> u64 {
    match parse_quantity(raw) {
        Ok(count) => count,
        Err(error) => {
            anomalies.push(Anomaly::Quantity {
                source: source(),
                resource: resource.to_string(),
                raw: raw.to_string(),
                error,
            });
            0
        }
    }
}
