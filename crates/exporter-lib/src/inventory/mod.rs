//! Node and pod inventory from the orchestrator API
//!
//! The inventory client performs exactly two read calls per scan and
//! normalises every failure into [`InventoryError`]. Retries are never
//! attempted here; a failed call fails the whole scan.

mod kubernetes;

pub use kubernetes::{convert_node, convert_pod, normalize_error, KubeInventoryClient};

use crate::models::{NodeRecord, PodClaim};
use async_trait::async_trait;
use std::fmt;

/// Errors that abort a single scan
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    /// The API server could not be reached (network, TLS, auth, timeout)
    #[error("transport error: {0}")]
    Transport(String),

    /// The API server answered with a well-formed error status
    #[error("API error {status} ({reason}): {message}")]
    Api {
        status: u16,
        reason: String,
        message: String,
    },

    /// The response body could not be decoded
    #[error("malformed response (status {status}): {body}")]
    MalformedResponse { status: u16, body: String },
}

/// Which inventory call a failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryCall {
    ListNodes,
    ListPods,
}

impl InventoryCall {
    pub fn as_str(&self) -> &'static str {
        match self {
            InventoryCall::ListNodes => "list_nodes",
            InventoryCall::ListPods => "list_pods",
        }
    }
}

impl fmt::Display for InventoryCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source of raw cluster inventory
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// List every node with its labels and resource maps
    async fn list_nodes(&self) -> Result<Vec<NodeRecord>, InventoryError>;

    /// List pods across all namespaces
    ///
    /// Namespace filtering is left to the aggregator so that it happens
    /// exactly once.
    async fn list_pods(&self) -> Result<Vec<PodClaim>, InventoryError>;
}
