//! Observability infrastructure for the exporter itself
//!
//! Provides:
//! - Prometheus self-metrics (scan latency, failures by call, anomalies by kind)
//! - Structured JSON logging with tracing

use crate::aggregator::{Anomaly, QuantitySource};
use crate::inventory::{InventoryCall, InventoryError};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for scan latency (in seconds)
const SCAN_LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Exporter self-metrics
///
/// Cheap to clone; clones share the underlying collectors.
#[derive(Clone)]
pub struct ExporterMetrics {
    scans_completed: IntCounter,
    scan_failures: IntCounterVec,
    anomalies: IntCounterVec,
    scan_latency_seconds: Histogram,
    last_success_timestamp_seconds: IntGauge,
}

impl ExporterMetrics {
    /// Create the self-metrics and register them on `registry`
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            scans_completed: IntCounter::new(
                "occupancy_exporter_scans_completed_total",
                "Number of scans that published a snapshot",
            )?,
            scan_failures: IntCounterVec::new(
                Opts::new(
                    "occupancy_exporter_scan_failures_total",
                    "Number of scans aborted by an inventory error",
                ),
                &["call", "kind"],
            )?,
            anomalies: IntCounterVec::new(
                Opts::new(
                    "occupancy_exporter_anomalies_total",
                    "Number of entry-scoped anomalies met while aggregating",
                ),
                &["kind"],
            )?,
            scan_latency_seconds: Histogram::with_opts(
                HistogramOpts::new(
                    "occupancy_exporter_scan_latency_seconds",
                    "Wall-clock time of successful scans",
                )
                .buckets(SCAN_LATENCY_BUCKETS.to_vec()),
            )?,
            last_success_timestamp_seconds: IntGauge::new(
                "occupancy_exporter_last_success_timestamp_seconds",
                "Unix time of the last published snapshot",
            )?,
        };

        registry.register(Box::new(metrics.scans_completed.clone()))?;
        registry.register(Box::new(metrics.scan_failures.clone()))?;
        registry.register(Box::new(metrics.anomalies.clone()))?;
        registry.register(Box::new(metrics.scan_latency_seconds.clone()))?;
        registry.register(Box::new(metrics.last_success_timestamp_seconds.clone()))?;

        Ok(metrics)
    }

    /// Record a published scan
    pub fn observe_scan(&self, duration: Duration, timestamp_secs: i64) {
        self.scans_completed.inc();
        self.scan_latency_seconds.observe(duration.as_secs_f64());
        self.last_success_timestamp_seconds.set(timestamp_secs);
    }

    /// Record a scan aborted by `error` during `call`
    pub fn inc_scan_failure(&self, call: InventoryCall, error: &InventoryError) {
        self.scan_failures
            .with_label_values(&[call.as_str(), error_kind(error)])
            .inc();
    }

    /// Record one aggregation anomaly
    pub fn inc_anomaly(&self, anomaly: &Anomaly) {
        self.anomalies.with_label_values(&[anomaly.kind()]).inc();
    }

    pub fn scans_completed(&self) -> u64 {
        self.scans_completed.get()
    }

    pub fn scan_failures(&self, call: InventoryCall, kind: &str) -> u64 {
        self.scan_failures
            .with_label_values(&[call.as_str(), kind])
            .get()
    }

    pub fn anomalies(&self, kind: &str) -> u64 {
        self.anomalies.with_label_values(&[kind]).get()
    }
}

/// Short label for an inventory error
pub fn error_kind(error: &InventoryError) -> &'static str {
    match error {
        InventoryError::Transport(_) => "transport",
        InventoryError::Api { .. } => "api",
        InventoryError::MalformedResponse { .. } => "malformed_response",
    }
}

/// Structured logger for exporter events
///
/// Emits one JSON event per lifecycle step with a stable `event` field.
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    /// Log exporter startup with its effective configuration
    pub fn log_startup(
        &self,
        version: &str,
        port: u16,
        tracked_resources: &[String],
        monitored_namespaces: &[String],
        model_label_key: &str,
        interval: Duration,
    ) {
        info!(
            event = "exporter_started",
            instance = %self.instance,
            version = %version,
            port = port,
            tracked_resources = ?tracked_resources,
            monitored_namespaces = ?monitored_namespaces,
            model_label_key = %model_label_key,
            interval_secs = interval.as_secs(),
            "Occupancy exporter started"
        );
    }

    /// Log a successful scan
    pub fn log_scan_completed(
        &self,
        duration: Duration,
        nodes: usize,
        pods: usize,
        allocatable_entries: usize,
        allocated_entries: usize,
        anomalies: usize,
    ) {
        info!(
            event = "scan_completed",
            instance = %self.instance,
            elapsed_ms = duration.as_millis() as u64,
            nodes = nodes,
            pods = pods,
            allocatable_entries = allocatable_entries,
            allocated_entries = allocated_entries,
            anomalies = anomalies,
            "Published occupancy snapshot"
        );
    }

    /// Log a scan aborted by an inventory error
    pub fn log_scan_failed(&self, call: InventoryCall, error: &InventoryError) {
        match error {
            InventoryError::Api {
                status,
                reason,
                message,
            } => {
                warn!(
                    event = "scan_failed",
                    instance = %self.instance,
                    call = %call,
                    kind = "api",
                    status = *status,
                    reason = %reason,
                    message = %message,
                    "Scan aborted, keeping previous snapshot"
                );
            }
            InventoryError::MalformedResponse { status, body } => {
                warn!(
                    event = "scan_failed",
                    instance = %self.instance,
                    call = %call,
                    kind = "malformed_response",
                    status = *status,
                    body = %body,
                    "Scan aborted, keeping previous snapshot"
                );
            }
            InventoryError::Transport(message) => {
                warn!(
                    event = "scan_failed",
                    instance = %self.instance,
                    call = %call,
                    kind = "transport",
                    message = %message,
                    "Scan aborted, keeping previous snapshot"
                );
            }
        }
    }

    /// Log an entry-scoped aggregation anomaly
    pub fn log_anomaly(&self, anomaly: &Anomaly) {
        match anomaly {
            Anomaly::Quantity {
                source,
                resource,
                raw,
                error,
            } => {
                let (node, pod) = match source {
                    QuantitySource::Node { node } => (Some(node.as_str()), None),
                    QuantitySource::Pod { .. } => (None, Some(source.to_string())),
                };
                warn!(
                    event = "aggregation_anomaly",
                    instance = %self.instance,
                    node = ?node,
                    pod = ?pod,
                    resource = %resource,
                    raw = %raw,
                    error = %error,
                    "Unreadable quantity counted as 0"
                );
            }
            Anomaly::StaleNodeReference {
                namespace,
                pod,
                node,
            } => {
                warn!(
                    event = "stale_node_reference",
                    instance = %self.instance,
                    namespace = %namespace,
                    pod = %pod,
                    node = %node,
                    "Pod references a node missing from the listing, skipped"
                );
            }
        }
    }

    /// Log exporter shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "exporter_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Occupancy exporter shutting down"
        );
    }
}
