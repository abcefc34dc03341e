//! Kubernetes-backed inventory client

use super::{InventoryClient, InventoryError};
use crate::models::{ContainerClaim, NodeRecord, PodClaim, ResourceList};
use anyhow::{Context, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Reason the client library reports when an error body is not JSON
const UNPARSEABLE_ERROR_REASON: &str = "Failed to parse error data";

/// Inventory client talking to the Kubernetes API server
///
/// Holds one pooled [`Client`]; each list call scopes its own typed
/// [`Api`] handle over a clone of it.
#[derive(Clone)]
pub struct KubeInventoryClient {
    client: Client,
}

impl KubeInventoryClient {
    /// Wrap an existing client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from an explicit kubeconfig, or infer in-cluster /
    /// default kubeconfig settings when `kubeconfig` is `None`
    pub async fn connect(kubeconfig: Option<&Path>, read_timeout: Duration) -> Result<Self> {
        let mut config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).with_context(|| {
                    format!("Failed to read kubeconfig file: {}", path.display())
                })?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .with_context(|| {
                        format!("Failed to create config from kubeconfig: {}", path.display())
                    })?
            }
            None => Config::infer()
                .await
                .context("Failed to infer Kubernetes configuration")?,
        };
        config.read_timeout = Some(read_timeout);

        let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
        Ok(Self::new(client))
    }

    /// Check connectivity and authorization against the API server
    pub async fn verify(&self) -> Result<String> {
        let info = self
            .client
            .apiserver_version()
            .await
            .context("Failed to reach the Kubernetes API server")?;
        info!(version = %info.git_version, "Connected to Kubernetes API server");
        Ok(info.git_version)
    }
}

#[async_trait]
impl InventoryClient for KubeInventoryClient {
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, InventoryError> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let list = nodes
            .list(&ListParams::default())
            .await
            .map_err(normalize_error)?;

        debug!(count = list.items.len(), "Listed nodes");
        Ok(list.items.into_iter().map(convert_node).collect())
    }

    async fn list_pods(&self) -> Result<Vec<PodClaim>, InventoryError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods
            .list(&ListParams::default())
            .await
            .map_err(normalize_error)?;

        debug!(count = list.items.len(), "Listed pods");
        Ok(list.items.into_iter().map(convert_pod).collect())
    }
}

/// Map a client library error onto the scan-level error taxonomy
pub fn normalize_error(err: kube::Error) -> InventoryError {
    match err {
        kube::Error::Api(response) if response.reason == UNPARSEABLE_ERROR_REASON => {
            InventoryError::MalformedResponse {
                status: response.code,
                body: unquote_body(response.message),
            }
        }
        kube::Error::Api(response) => InventoryError::Api {
            status: response.code,
            reason: response.reason,
            message: response.message,
        },
        kube::Error::SerdeError(e) => InventoryError::MalformedResponse {
            status: 200,
            body: e.to_string(),
        },
        // The library drops the status along with a non-UTF-8 body
        kube::Error::FromUtf8(e) => InventoryError::MalformedResponse {
            status: 0,
            body: String::from_utf8_lossy(e.as_bytes()).into_owned(),
        },
        other => InventoryError::Transport(other.to_string()),
    }
}

/// The client library stores an unparseable error body as its quoted,
/// escaped debug form; recover the raw text
fn unquote_body(message: String) -> String {
    serde_json::from_str::<String>(&message).unwrap_or(message)
}

fn quantities(list: Option<BTreeMap<String, Quantity>>) -> Option<ResourceList> {
    list.map(|map| map.into_iter().map(|(k, q)| (k, q.0)).collect())
}

/// Convert an API node into a scan-scoped record
pub fn convert_node(node: Node) -> NodeRecord {
    let status = node.status.unwrap_or_default();

    NodeRecord {
        name: node.metadata.name.unwrap_or_default(),
        labels: node.metadata.labels.unwrap_or_default(),
        allocatable: quantities(status.allocatable).unwrap_or_default(),
        capacity: quantities(status.capacity).unwrap_or_default(),
    }
}

/// Convert an API pod into a scan-scoped claim
pub fn convert_pod(pod: Pod) -> PodClaim {
    let spec = pod.spec.unwrap_or_default();
    let phase = pod.status.and_then(|s| s.phase);

    let containers = spec
        .containers
        .into_iter()
        .map(|container| {
            let resources = container.resources.unwrap_or_default();
            ContainerClaim {
                limits: quantities(resources.limits),
                requests: quantities(resources.requests),
            }
        })
        .collect();

    PodClaim {
        namespace: pod
            .metadata
            .namespace
            .unwrap_or_else(|| "default".to_string()),
        name: pod.metadata.name.unwrap_or_default(),
        node_name: spec.node_name,
        phase,
        containers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        Container, NodeStatus, PodSpec, PodStatus, ResourceRequirements,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::core::ErrorResponse;

    fn quantity_map(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
            .collect()
    }

    #[test]
    fn test_convert_node() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("gpu-node-1".to_string()),
                labels: Some(BTreeMap::from([(
                    "nvidia.com/product".to_string(),
                    "A100".to_string(),
                )])),
                ..Default::default()
            },
            status: Some(NodeStatus {
                allocatable: Some(quantity_map(&[("nvidia.com/gpu", "4"), ("cpu", "64")])),
                capacity: Some(quantity_map(&[("nvidia.com/gpu", "8")])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let record = convert_node(node);

        assert_eq!(record.name, "gpu-node-1");
        assert_eq!(record.model("nvidia.com/product"), "A100");
        assert_eq!(record.allocatable["nvidia.com/gpu"], "4");
        assert_eq!(record.capacity["nvidia.com/gpu"], "8");
    }

    #[test]
    fn test_convert_node_without_status() {
        let node = Node {
            metadata: ObjectMeta {
                name: Some("bare".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let record = convert_node(node);

        assert!(record.allocatable.is_empty());
        assert!(record.capacity.is_empty());
        assert_eq!(record.model("nvidia.com/product"), "Generic");
    }

    #[test]
    fn test_convert_pod() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("trainer".to_string()),
                namespace: Some("ml".to_string()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("gpu-node-1".to_string()),
                containers: vec![
                    Container {
                        name: "main".to_string(),
                        resources: Some(ResourceRequirements {
                            limits: Some(quantity_map(&[("nvidia.com/gpu", "2")])),
                            requests: Some(quantity_map(&[("nvidia.com/gpu", "1")])),
                            ..Default::default()
                        }),
                        ..Default::default()
                    },
                    Container {
                        name: "sidecar".to_string(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
        };

        let claim = convert_pod(pod);

        assert_eq!(claim.namespace, "ml");
        assert_eq!(claim.name, "trainer");
        assert_eq!(claim.node_name.as_deref(), Some("gpu-node-1"));
        assert_eq!(claim.phase.as_deref(), Some("Running"));
        assert_eq!(claim.containers.len(), 2);
        assert_eq!(
            claim.containers[0].limits.as_ref().unwrap()["nvidia.com/gpu"],
            "2"
        );
        assert!(claim.containers[1].limits.is_none());
        assert!(claim.containers[1].requests.is_none());
    }

    #[test]
    fn test_convert_unscheduled_pod() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("pending".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };

        let claim = convert_pod(pod);

        assert_eq!(claim.namespace, "default");
        assert!(claim.node_name.is_none());
        assert!(claim.containers.is_empty());
    }

    #[test]
    fn test_normalize_api_error() {
        let err = kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "nodes is forbidden".to_string(),
            reason: "Forbidden".to_string(),
            code: 403,
        });

        match normalize_error(err) {
            InventoryError::Api {
                status,
                reason,
                message,
            } => {
                assert_eq!(status, 403);
                assert_eq!(reason, "Forbidden");
                assert_eq!(message, "nodes is forbidden");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_normalize_unparseable_error_body() {
        let text = "<html>\n<h1>502 \"Bad Gateway\"</h1>\n</html>";
        // Built the way the client library reports a non-JSON error body
        let err = kube::Error::Api(ErrorResponse {
            status: "502 Bad Gateway".to_string(),
            message: format!("{text:?}"),
            reason: UNPARSEABLE_ERROR_REASON.to_string(),
            code: 502,
        });

        match normalize_error(err) {
            InventoryError::MalformedResponse { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, text);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_unquote_keeps_unquoted_message() {
        assert_eq!(unquote_body("plain text".to_string()), "plain text");
    }

    #[test]
    fn test_normalize_non_utf8_body() {
        let invalid = String::from_utf8(vec![b'o', b'k', 0xff]).unwrap_err();

        match normalize_error(kube::Error::FromUtf8(invalid)) {
            InventoryError::MalformedResponse { body, .. } => {
                assert!(body.starts_with("ok"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_normalize_decode_failure() {
        let decode = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();

        assert!(matches!(
            normalize_error(kube::Error::SerdeError(decode)),
            InventoryError::MalformedResponse { status: 200, .. }
        ));
    }
}
