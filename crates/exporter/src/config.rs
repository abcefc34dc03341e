//! Exporter configuration

use anyhow::{bail, Context, Result};
use exporter_lib::aggregator::AggregationConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Raw environment, as read by the `config` crate
#[derive(Debug, Clone, Deserialize)]
struct RawConfig {
    #[serde(default = "default_port")]
    port: u16,

    #[serde(default)]
    debug: Option<String>,

    #[serde(default)]
    extended_resources: Option<String>,

    #[serde(default)]
    monitored_namespaces: Option<String>,

    #[serde(default = "default_model_label")]
    node_label_for_model: String,

    #[serde(default = "default_interscan_pause")]
    interscan_pause: u64,

    #[serde(default)]
    kubeconfig_path: Option<String>,

    #[serde(default = "default_api_timeout")]
    api_timeout_secs: u64,
}

fn default_port() -> u16 {
    9400
}

fn default_model_label() -> String {
    "nvidia.com/product".to_string()
}

fn default_interscan_pause() -> u64 {
    2
}

fn default_api_timeout() -> u64 {
    30
}

/// Exporter configuration
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Port the HTTP server listens on
    pub port: u16,
    /// Verbose logging
    pub debug: bool,
    /// Extended resource names to count
    pub extended_resources: Vec<String>,
    /// Namespaces whose pods are counted as allocations
    pub monitored_namespaces: Vec<String>,
    /// Node label holding the accelerator model
    pub node_label_for_model: String,
    /// Pause between scans
    pub interscan_pause: Duration,
    /// Explicit kubeconfig; in-cluster or default inference when unset
    pub kubeconfig_path: Option<PathBuf>,
    /// Read timeout for API server calls
    pub api_timeout: Duration,
}

impl ExporterConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_source(config::Environment::default())
    }

    fn from_source(source: config::Environment) -> Result<Self> {
        let raw: RawConfig = config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
            .context("Invalid exporter configuration")?;

        let extended_resources = match raw.extended_resources.as_deref() {
            Some(value) => parse_list(value).context("Invalid EXTENDED_RESOURCES")?,
            None => vec!["nvidia.com/gpu".to_string()],
        };
        let monitored_namespaces = match raw.monitored_namespaces.as_deref() {
            Some(value) => parse_list(value).context("Invalid MONITORED_NAMESPACES")?,
            None => vec!["default".to_string()],
        };

        if extended_resources.is_empty() {
            bail!("EXTENDED_RESOURCES must name at least one resource");
        }
        if raw.interscan_pause == 0 {
            bail!("INTERSCAN_PAUSE must be greater than zero");
        }
        if raw.api_timeout_secs == 0 {
            bail!("API_TIMEOUT_SECS must be greater than zero");
        }

        Ok(Self {
            port: raw.port,
            debug: raw.debug.as_deref().map(is_truthy).unwrap_or(false),
            extended_resources,
            monitored_namespaces,
            node_label_for_model: raw.node_label_for_model,
            interscan_pause: Duration::from_secs(raw.interscan_pause),
            kubeconfig_path: raw
                .kubeconfig_path
                .filter(|path| !path.trim().is_empty())
                .map(PathBuf::from),
            api_timeout: Duration::from_secs(raw.api_timeout_secs),
        })
    }

    /// Aggregation settings derived from this configuration
    pub fn aggregation(&self) -> AggregationConfig {
        AggregationConfig {
            tracked_resources: self.extended_resources.clone(),
            monitored_namespaces: self.monitored_namespaces.iter().cloned().collect(),
            model_label_key: self.node_label_for_model.clone(),
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "y" | "yes" | "true" | "on"
    )
}

/// Parse a JSON string array, or a comma-separated list
fn parse_list(value: &str) -> Result<Vec<String>> {
    let value = value.trim();
    let items: Vec<String> = if value.starts_with('[') {
        serde_json::from_str(value).context("expected a JSON array of strings")?
    } else {
        value.split(',').map(str::to_string).collect()
    };

    Ok(items
        .into_iter()
        .map(|item| item.trim().to_string())
        .filter(|item| !item.is_empty())
        .collect())
}
