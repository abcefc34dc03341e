//! Occupancy scan loop
//!
//! Fetches inventory on a fixed interval, aggregates it and atomically
//! publishes the result. At most one scan is in flight: a tick that fires
//! while a scan is running is dropped.

use super::SnapshotStore;
use crate::aggregator::{
    compute_allocatable, compute_allocated, compute_capacity, AggregationConfig, Anomaly,
};
use crate::health::HealthRegistry;
use crate::inventory::{InventoryCall, InventoryClient, InventoryError};
use crate::models::{NodeRecord, OccupancySnapshot, PodClaim};
use crate::observability::{ExporterMetrics, StructuredLogger};
use anyhow::Result;
use chrono::Utc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Configuration for the scan loop
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Pause between scan ticks (default: 2 seconds)
    pub interval: Duration,
    /// What to count and how to classify it
    pub aggregation: AggregationConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            aggregation: AggregationConfig::default(),
        }
    }
}

/// Phase of the scan state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ScanState {
    Idle = 0,
    Scanning = 1,
    Aggregating = 2,
    Publishing = 3,
}

impl ScanState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ScanState::Scanning,
            2 => ScanState::Aggregating,
            3 => ScanState::Publishing,
            _ => ScanState::Idle,
        }
    }
}

/// Why a scan did not publish
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// An inventory call failed; the previous snapshot stays published
    #[error("{call} failed: {source}")]
    Inventory {
        call: InventoryCall,
        #[source]
        source: InventoryError,
    },

    /// Another scan was still in flight
    #[error("a scan is already in flight")]
    Busy,
}

/// Holds the state machine out of `Idle` for the duration of one scan
///
/// Dropping the guard returns to `Idle` on every exit path.
struct ScanGuard<'a> {
    state: &'a AtomicU8,
}

impl<'a> ScanGuard<'a> {
    fn begin(state: &'a AtomicU8) -> Option<Self> {
        state
            .compare_exchange(
                ScanState::Idle as u8,
                ScanState::Scanning as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| Self { state })
    }

    fn advance(&self, next: ScanState) {
        self.state.store(next as u8, Ordering::Release);
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.state.store(ScanState::Idle as u8, Ordering::Release);
    }
}

/// Drives periodic scans and owns publication into the [`SnapshotStore`]
pub struct SnapshotPublisher {
    client: Arc<dyn InventoryClient>,
    store: Arc<SnapshotStore>,
    config: ScanConfig,
    state: AtomicU8,
    metrics: Option<ExporterMetrics>,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

impl SnapshotPublisher {
    /// Create a new publisher writing into `store`
    pub fn new(
        client: Arc<dyn InventoryClient>,
        store: Arc<SnapshotStore>,
        config: ScanConfig,
    ) -> Self {
        Self {
            client,
            store,
            config,
            state: AtomicU8::new(ScanState::Idle as u8),
            metrics: None,
            health: None,
            logger: StructuredLogger::new("occupancy-exporter"),
        }
    }

    /// Current phase of the state machine
    pub fn state(&self) -> ScanState {
        ScanState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    /// Run the scan loop until a shutdown signal arrives
    ///
    /// An in-flight scan is not cancelled; shutdown is observed once it ends.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            "Starting occupancy scan loop"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.scan_once().await {
                        Ok(_) => {}
                        Err(ScanError::Busy) => debug!("Tick dropped, scan still in flight"),
                        // Already logged and recorded by scan_once
                        Err(ScanError::Inventory { .. }) => {}
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down occupancy scan loop");
                    break;
                }
            }
        }
    }

    /// Perform one full scan and publish its snapshot
    pub async fn scan_once(&self) -> Result<Arc<OccupancySnapshot>, ScanError> {
        let guard = ScanGuard::begin(&self.state).ok_or(ScanError::Busy)?;
        let start = Instant::now();

        let (nodes, pods) = match self.fetch_inventory().await {
            Ok(inventory) => inventory,
            Err(err) => {
                self.record_failure(&err).await;
                return Err(err);
            }
        };

        guard.advance(ScanState::Aggregating);
        let aggregation = &self.config.aggregation;
        let allocatable = compute_allocatable(
            &nodes,
            &aggregation.tracked_resources,
            &aggregation.model_label_key,
        );
        let capacity = compute_capacity(
            &nodes,
            &aggregation.tracked_resources,
            &aggregation.model_label_key,
        );
        let allocated = compute_allocated(&nodes, &pods, aggregation);

        let anomalies: Vec<&Anomaly> = allocatable
            .anomalies
            .iter()
            .chain(capacity.anomalies.iter())
            .chain(allocated.anomalies.iter())
            .collect();
        for anomaly in &anomalies {
            self.logger.log_anomaly(anomaly);
            if let Some(metrics) = &self.metrics {
                metrics.inc_anomaly(anomaly);
            }
        }

        guard.advance(ScanState::Publishing);
        let scan_duration = start.elapsed();
        let now = Utc::now();
        let timestamp = match self.store.current().snapshot() {
            Some(previous) if previous.timestamp > now => previous.timestamp,
            _ => now,
        };

        let snapshot = Arc::new(OccupancySnapshot {
            timestamp,
            scan_duration,
            allocatable: allocatable.entries,
            capacity: capacity.entries,
            allocated: allocated.entries,
        });
        self.store.publish(snapshot.clone());
        drop(guard);

        if let Some(metrics) = &self.metrics {
            metrics.observe_scan(scan_duration, timestamp.timestamp());
        }
        if let Some(health) = &self.health {
            health.record_publish().await;
        }
        self.logger.log_scan_completed(
            scan_duration,
            nodes.len(),
            pods.len(),
            snapshot.allocatable.len(),
            snapshot.allocated.len(),
            anomalies.len(),
        );

        Ok(snapshot)
    }

    /// List nodes, then pods; the first failure aborts the scan
    async fn fetch_inventory(&self) -> Result<(Vec<NodeRecord>, Vec<PodClaim>), ScanError> {
        let nodes = self
            .client
            .list_nodes()
            .await
            .map_err(|source| ScanError::Inventory {
                call: InventoryCall::ListNodes,
                source,
            })?;

        let pods = self
            .client
            .list_pods()
            .await
            .map_err(|source| ScanError::Inventory {
                call: InventoryCall::ListPods,
                source,
            })?;

        Ok((nodes, pods))
    }

    async fn record_failure(&self, err: &ScanError) {
        let ScanError::Inventory { call, source } = err else {
            return;
        };

        self.logger.log_scan_failed(*call, source);
        if let Some(metrics) = &self.metrics {
            metrics.inc_scan_failure(*call, source);
        }
        if let Some(health) = &self.health {
            health.record_scan_failure(err.to_string()).await;
        }
    }
}

/// Builder for creating the scan loop
pub struct SnapshotPublisherBuilder {
    client: Option<Arc<dyn InventoryClient>>,
    store: Option<Arc<SnapshotStore>>,
    config: ScanConfig,
    metrics: Option<ExporterMetrics>,
    health: Option<HealthRegistry>,
    logger: Option<StructuredLogger>,
}

impl SnapshotPublisherBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            client: None,
            store: None,
            config: ScanConfig::default(),
            metrics: None,
            health: None,
            logger: None,
        }
    }

    /// Set the inventory client
    pub fn client(mut self, client: Arc<dyn InventoryClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the store snapshots are published into
    pub fn store(mut self, store: Arc<SnapshotStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Set the scan interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Set what to count and how to classify it
    pub fn aggregation(mut self, aggregation: AggregationConfig) -> Self {
        self.config.aggregation = aggregation;
        self
    }

    pub fn metrics(mut self, metrics: ExporterMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Build the publisher
    pub fn build(self) -> Result<SnapshotPublisher> {
        let client = self
            .client
            .ok_or_else(|| anyhow::anyhow!("Inventory client is required"))?;
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("Snapshot store is required"))?;
        if self.config.interval.is_zero() {
            anyhow::bail!("Scan interval must be greater than zero");
        }
        if self.config.aggregation.tracked_resources.is_empty() {
            anyhow::bail!("At least one tracked resource is required");
        }

        let mut publisher = SnapshotPublisher::new(client, store, self.config);
        publisher.metrics = self.metrics;
        publisher.health = self.health;
        if let Some(logger) = self.logger {
            publisher.logger = logger;
        }
        Ok(publisher)
    }
}

impl Default for SnapshotPublisherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
