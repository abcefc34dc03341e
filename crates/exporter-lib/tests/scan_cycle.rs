//! Integration tests for a full scan cycle
//!
//! Drives the publisher against an in-memory inventory and reads the
//! result back through the metrics facade, the way a scrape would.

use async_trait::async_trait;
use exporter_lib::aggregator::AggregationConfig;
use exporter_lib::inventory::{InventoryClient, InventoryError};
use exporter_lib::publisher::{ScanError, SnapshotPublisherBuilder};
use exporter_lib::{
    ContainerClaim, MetricsFacade, NodeRecord, PodClaim, SnapshotStore, SnapshotView,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Inventory whose contents and failure mode can be changed between scans
#[derive(Default)]
struct ScriptedInventory {
    nodes: Mutex<Vec<NodeRecord>>,
    pods: Mutex<Vec<PodClaim>>,
    unreachable: AtomicBool,
}

#[async_trait]
impl InventoryClient for ScriptedInventory {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, InventoryError> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(InventoryError::Transport("dial tcp: i/o timeout".to_string()));
        }
        Ok(self.nodes.lock().unwrap().clone())
    }

    async fn list_pods(&self) -> Result<Vec<PodClaim>, InventoryError> {
        Ok(self.pods.lock().unwrap().clone())
    }
}

fn gpu_node(name: &str, model: Option<&str>, gpus: u64) -> NodeRecord {
    let resources = BTreeMap::from([("gpu".to_string(), gpus.to_string())]);
    NodeRecord {
        name: name.to_string(),
        labels: model
            .map(|m| BTreeMap::from([("model".to_string(), m.to_string())]))
            .unwrap_or_default(),
        allocatable: resources.clone(),
        capacity: resources,
    }
}

fn gpu_pod(namespace: &str, name: &str, node: &str, gpus: u64) -> PodClaim {
    PodClaim {
        namespace: namespace.to_string(),
        name: name.to_string(),
        node_name: Some(node.to_string()),
        phase: Some("Running".to_string()),
        containers: vec![ContainerClaim {
            limits: Some(BTreeMap::from([("gpu".to_string(), gpus.to_string())])),
            requests: None,
        }],
    }
}

struct Harness {
    inventory: Arc<ScriptedInventory>,
    store: Arc<SnapshotStore>,
    facade: MetricsFacade,
    publisher: exporter_lib::SnapshotPublisher,
}

fn harness() -> Harness {
    let inventory = Arc::new(ScriptedInventory::default());
    let store = Arc::new(SnapshotStore::new());
    let facade = MetricsFacade::new(store.clone()).unwrap();
    let publisher = SnapshotPublisherBuilder::new()
        .client(inventory.clone())
        .store(store.clone())
        .aggregation(AggregationConfig {
            tracked_resources: vec!["gpu".to_string()],
            monitored_namespaces: BTreeSet::from(["default".to_string()]),
            model_label_key: "model".to_string(),
        })
        .build()
        .unwrap();

    Harness {
        inventory,
        store,
        facade,
        publisher,
    }
}

fn scrape(facade: &MetricsFacade) -> String {
    String::from_utf8(facade.render().unwrap()).unwrap()
}

#[tokio::test]
async fn test_end_to_end_single_node() {
    let h = harness();
    *h.inventory.nodes.lock().unwrap() = vec![gpu_node("n1", Some("A100"), 4)];
    *h.inventory.pods.lock().unwrap() = vec![gpu_pod("default", "p1", "n1", 2)];

    h.publisher.scan_once().await.unwrap();

    let view = h.facade.current_snapshot();
    let snapshot = view.snapshot().unwrap();
    assert_eq!(snapshot.allocatable.len(), 1);
    assert_eq!(
        (
            snapshot.allocatable[0].node.as_str(),
            snapshot.allocatable[0].model.as_str(),
            snapshot.allocatable[0].resource.as_str(),
            snapshot.allocatable[0].count
        ),
        ("n1", "A100", "gpu", 4)
    );
    assert_eq!(snapshot.allocated.len(), 1);
    assert_eq!(snapshot.allocated[0].namespace, "default");
    assert_eq!(snapshot.allocated[0].pod, "p1");
    assert_eq!(snapshot.allocated[0].count, 2);

    let text = scrape(&h.facade);
    assert!(text.contains("allocatable_accelerators{"));
    assert!(text.contains("pod=\"p1\""));
}

#[tokio::test]
async fn test_unlabelled_node_is_generic() {
    let h = harness();
    *h.inventory.nodes.lock().unwrap() = vec![gpu_node("n1", None, 4)];
    *h.inventory.pods.lock().unwrap() = vec![gpu_pod("default", "p1", "n1", 2)];

    let snapshot = h.publisher.scan_once().await.unwrap();

    assert_eq!(snapshot.allocatable[0].model, "Generic");
    assert_eq!(snapshot.allocated[0].model, "Generic");
}

#[tokio::test]
async fn test_unmonitored_namespace_keeps_allocatable() {
    let h = harness();
    *h.inventory.nodes.lock().unwrap() = vec![gpu_node("n1", Some("A100"), 4)];
    *h.inventory.pods.lock().unwrap() = vec![gpu_pod("other", "p1", "n1", 2)];

    let snapshot = h.publisher.scan_once().await.unwrap();

    assert!(snapshot.allocated.is_empty());
    assert_eq!(snapshot.allocatable[0].count, 4);
}

#[tokio::test]
async fn test_outage_never_blanks_metrics() {
    let h = harness();
    *h.inventory.nodes.lock().unwrap() = vec![gpu_node("n1", Some("A100"), 4)];
    *h.inventory.pods.lock().unwrap() = vec![gpu_pod("default", "p1", "n1", 2)];

    // Before any scan there is nothing to serve
    assert!(matches!(h.facade.current_snapshot(), SnapshotView::NoDataYet));

    let good = h.publisher.scan_once().await.unwrap();
    let before = scrape(&h.facade);

    h.inventory.unreachable.store(true, Ordering::SeqCst);
    for _ in 0..3 {
        assert!(matches!(
            h.publisher.scan_once().await,
            Err(ScanError::Inventory { .. })
        ));
    }

    let view = h.store.current();
    let served = view.snapshot().unwrap();
    assert!(Arc::ptr_eq(served, &good));
    assert_eq!(scrape(&h.facade), before);

    // Recovery publishes fresh data
    h.inventory.unreachable.store(false, Ordering::SeqCst);
    h.inventory.pods.lock().unwrap().clear();
    let recovered = h.publisher.scan_once().await.unwrap();
    assert!(recovered.allocated.is_empty());
    assert!(recovered.timestamp >= good.timestamp);
}

#[tokio::test]
async fn test_pod_on_vanished_node_does_not_abort_scan() {
    let h = harness();
    *h.inventory.nodes.lock().unwrap() = vec![gpu_node("n1", Some("A100"), 4)];
    *h.inventory.pods.lock().unwrap() = vec![
        gpu_pod("default", "p1", "n1", 1),
        gpu_pod("default", "p2", "drained", 1),
    ];

    let snapshot = h.publisher.scan_once().await.unwrap();

    assert_eq!(snapshot.allocated.len(), 1);
    assert_eq!(snapshot.allocated[0].pod, "p1");
}
