//! Read-only metrics facade over the published snapshot
//!
//! Every scrape loads the current snapshot once and renders all occupancy
//! series from that single immutable value. Scrapes never trigger a scan
//! and never wait for one.

use crate::models::{AllocatableEntry, AllocatedEntry, OccupancySnapshot};
use crate::publisher::{SnapshotStore, SnapshotView};
use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{Encoder, Gauge, IntGaugeVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use tracing::warn;

const NODE_LABELS: &[&str] = &["node", "model", "extended_resource"];
const POD_LABELS: &[&str] = &["node", "model", "extended_resource", "namespace", "pod"];

fn allocatable_opts() -> Opts {
    Opts::new(
        "allocatable_accelerators",
        "Number of accelerators that can be allocated",
    )
}

fn capacity_opts() -> Opts {
    Opts::new(
        "capacity_accelerators",
        "Number of accelerators physically installed",
    )
}

fn allocated_opts() -> Opts {
    Opts::new(
        "allocated_accelerators",
        "Number of accelerators allocated to pods",
    )
}

fn scan_time_opts() -> Opts {
    Opts::new(
        "accelerator_alloc_scan_time_seconds",
        "Time required to perform a full scan of nodes and of the pods",
    )
}

fn clamp(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// Prometheus collector rendering the current snapshot on every gather
pub struct SnapshotCollector {
    store: Arc<SnapshotStore>,
    descs: Vec<Desc>,
}

impl SnapshotCollector {
    pub fn new(store: Arc<SnapshotStore>) -> prometheus::Result<Self> {
        let mut descs = Vec::new();
        for (opts, labels) in [
            (allocatable_opts(), NODE_LABELS),
            (capacity_opts(), NODE_LABELS),
            (allocated_opts(), POD_LABELS),
        ] {
            descs.extend(
                IntGaugeVec::new(opts, labels)?
                    .desc()
                    .into_iter()
                    .cloned(),
            );
        }
        descs.extend(Gauge::with_opts(scan_time_opts())?.desc().into_iter().cloned());

        Ok(Self { store, descs })
    }

    fn render(snapshot: &OccupancySnapshot) -> prometheus::Result<Vec<MetricFamily>> {
        let mut families = Vec::with_capacity(4);
        families.extend(node_series(allocatable_opts(), &snapshot.allocatable)?);
        families.extend(node_series(capacity_opts(), &snapshot.capacity)?);
        families.extend(pod_series(&snapshot.allocated)?);

        let scan_time = Gauge::with_opts(scan_time_opts())?;
        scan_time.set(snapshot.scan_duration.as_secs_f64());
        families.extend(scan_time.collect());

        Ok(families)
    }
}

fn node_series(opts: Opts, entries: &[AllocatableEntry]) -> prometheus::Result<Vec<MetricFamily>> {
    let vec = IntGaugeVec::new(opts, NODE_LABELS)?;
    for entry in entries {
        vec.get_metric_with_label_values(&[
            entry.node.as_str(),
            entry.model.as_str(),
            entry.resource.as_str(),
        ])?
        .set(clamp(entry.count));
    }
    Ok(vec.collect())
}

fn pod_series(entries: &[AllocatedEntry]) -> prometheus::Result<Vec<MetricFamily>> {
    let vec = IntGaugeVec::new(allocated_opts(), POD_LABELS)?;
    for entry in entries {
        vec.get_metric_with_label_values(&[
            entry.node.as_str(),
            entry.model.as_str(),
            entry.resource.as_str(),
            entry.namespace.as_str(),
            entry.pod.as_str(),
        ])?
        .set(clamp(entry.count));
    }
    Ok(vec.collect())
}

impl Collector for SnapshotCollector {
    fn desc(&self) -> Vec<&Desc> {
        self.descs.iter().collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let view = self.store.current();
        let Some(snapshot) = view.snapshot() else {
            return Vec::new();
        };

        match Self::render(snapshot) {
            Ok(families) => families,
            Err(e) => {
                warn!(error = %e, "Failed to render occupancy snapshot");
                Vec::new()
            }
        }
    }
}

/// Read-only access to the published snapshot for the scrape layer
#[derive(Clone)]
pub struct MetricsFacade {
    store: Arc<SnapshotStore>,
    registry: Registry,
}

impl MetricsFacade {
    /// Create the facade and register the occupancy collector on a fresh registry
    pub fn new(store: Arc<SnapshotStore>) -> prometheus::Result<Self> {
        let registry = Registry::new();
        registry.register(Box::new(SnapshotCollector::new(store.clone())?))?;
        Ok(Self { store, registry })
    }

    /// Registry that additional self-metrics may be registered on
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Last published snapshot, or `NoDataYet` before the first scan
    pub fn current_snapshot(&self) -> SnapshotView {
        self.store.current()
    }

    /// Render all registered metrics in the text exposition format
    pub fn render(&self) -> prometheus::Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::ExporterMetrics;
    use chrono::Utc;
    use std::time::Duration;

    fn snapshot() -> OccupancySnapshot {
        OccupancySnapshot {
            timestamp: Utc::now(),
            scan_duration: Duration::from_millis(250),
            allocatable: vec![AllocatableEntry {
                node: "n1".to_string(),
                model: "A100".to_string(),
                resource: "nvidia.com/gpu".to_string(),
                count: 4,
            }],
            capacity: vec![AllocatableEntry {
                node: "n1".to_string(),
                model: "A100".to_string(),
                resource: "nvidia.com/gpu".to_string(),
                count: 8,
            }],
            allocated: vec![AllocatedEntry {
                node: "n1".to_string(),
                model: "A100".to_string(),
                resource: "nvidia.com/gpu".to_string(),
                namespace: "default".to_string(),
                pod: "p1".to_string(),
                count: 2,
            }],
        }
    }

    fn rendered(facade: &MetricsFacade) -> String {
        String::from_utf8(facade.render().unwrap()).unwrap()
    }

    /// Find the sample line of `metric` carrying all `labels` and check its value
    fn assert_sample(text: &str, metric: &str, labels: &[&str], value: &str) {
        let line = text
            .lines()
            .find(|line| {
                line.starts_with(&format!("{}{{", metric))
                    && labels.iter().all(|label| line.contains(label))
            })
            .unwrap_or_else(|| panic!("no {} sample with {:?} in:\n{}", metric, labels, text));
        assert!(
            line.ends_with(&format!(" {}", value)),
            "unexpected value in {:?}",
            line
        );
    }

    #[test]
    fn test_no_series_before_first_scan() {
        let store = Arc::new(SnapshotStore::new());
        let facade = MetricsFacade::new(store).unwrap();

        assert!(!facade.current_snapshot().is_ready());
        assert!(!rendered(&facade).contains("accelerators"));
    }

    #[test]
    fn test_renders_all_series() {
        let store = Arc::new(SnapshotStore::new());
        let facade = MetricsFacade::new(store.clone()).unwrap();
        store.publish(snapshot());

        let text = rendered(&facade);

        assert_sample(
            &text,
            "allocatable_accelerators",
            &["node=\"n1\"", "model=\"A100\"", "extended_resource=\"nvidia.com/gpu\""],
            "4",
        );
        assert_sample(&text, "capacity_accelerators", &["node=\"n1\""], "8");
        assert_sample(
            &text,
            "allocated_accelerators",
            &["namespace=\"default\"", "pod=\"p1\""],
            "2",
        );
        assert!(text.contains("accelerator_alloc_scan_time_seconds 0.25"));
    }

    #[test]
    fn test_rerenders_after_publish() {
        let store = Arc::new(SnapshotStore::new());
        let facade = MetricsFacade::new(store.clone()).unwrap();
        store.publish(snapshot());

        let mut next = snapshot();
        next.allocated.clear();
        store.publish(next);

        let text = rendered(&facade);
        assert!(!text.contains("pod=\"p1\""));
        assert_sample(&text, "allocatable_accelerators", &["node=\"n1\""], "4");
    }

    #[test]
    fn test_self_metrics_share_registry() {
        let store = Arc::new(SnapshotStore::new());
        let facade = MetricsFacade::new(store).unwrap();
        let metrics = ExporterMetrics::register(facade.registry()).unwrap();
        metrics.observe_scan(Duration::from_millis(10), 1_700_000_000);

        assert!(rendered(&facade).contains("occupancy_exporter_scans_completed_total 1"));
    }
}
