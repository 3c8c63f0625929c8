//! Configuration for the fleet metrics publisher

use anyhow::{bail, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "JobWorkers";

/// Publish interval used when none is configured
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Per-publisher settings consumed by the metrics builder and transport
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    pub namespace: String,
    pub process_metrics_enabled: bool,
    /// Fixed dimensions appended to every record
    pub additional_dimensions: BTreeMap<String, String>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            process_metrics_enabled: true,
            additional_dimensions: BTreeMap::new(),
        }
    }
}

/// Command-line / environment configuration for the publisher binary
#[derive(Debug, Clone, Parser)]
#[command(name = "fleet-metrics-publisher")]
#[command(about = "Publishes job-processing fleet statistics to a metrics-ingestion service")]
pub struct Config {
    /// Host stats endpoint returning a JSON stats snapshot
    #[arg(long, env)]
    pub stats_url: String,

    /// Metrics-ingestion endpoint (HTTP POST)
    #[arg(long, env)]
    pub metrics_endpoint: Option<String>,

    /// Static bearer token for the metrics service
    #[arg(long, env)]
    pub metrics_token: Option<String>,

    /// File holding the bearer token; re-read whenever the token expires
    #[arg(long, env)]
    pub metrics_token_file: Option<PathBuf>,

    /// Metrics namespace
    #[arg(long, env, default_value = DEFAULT_NAMESPACE)]
    pub namespace: String,

    /// Skip per-process utilization metrics
    #[arg(long, env)]
    pub disable_process_metrics: bool,

    /// Extra dimension appended to every metric, as KEY=VALUE (repeatable)
    #[arg(long = "dimension", env = "METRIC_DIMENSIONS", value_delimiter = ',')]
    pub dimensions: Vec<String>,

    /// Dry-run mode (log metrics, send nothing)
    #[arg(long, env)]
    pub dry_run: bool,

    /// Only publish from the elected leader (host supports leader election)
    #[arg(long, env)]
    pub leader_election: bool,

    /// Seconds between publish cycles
    #[arg(long, env, default_value_t = 60)]
    pub interval_secs: u64,

    /// HTTP timeout in seconds for stats and metrics calls
    #[arg(long, env, default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Output logs in JSON format
    #[arg(long, env)]
    pub log_json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stats_url: "http://localhost:7433/stats".to_string(),
            metrics_endpoint: None,
            metrics_token: None,
            metrics_token_file: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
            disable_process_metrics: false,
            dimensions: Vec::new(),
            dry_run: true,
            leader_election: false,
            interval_secs: 60,
            request_timeout_secs: 10,
            log_json: false,
        }
    }
}

impl Config {
    /// Parse configuration from command-line args and environment variables
    pub fn parse_config() -> Self {
        Config::parse()
    }

    /// Check if metrics should actually be sent over HTTP
    pub fn has_metrics_endpoint(&self) -> bool {
        self.metrics_endpoint.is_some() && !self.dry_run
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Build the publisher settings, validating the dimension list
    pub fn publisher_config(&self) -> Result<PublisherConfig> {
        Ok(PublisherConfig {
            namespace: self.namespace.clone(),
            process_metrics_enabled: !self.disable_process_metrics,
            additional_dimensions: parse_dimensions(&self.dimensions)?,
        })
    }
}

/// Parse `KEY=VALUE` pairs; later keys override earlier ones
pub fn parse_dimensions(pairs: &[String]) -> Result<BTreeMap<String, String>> {
    let mut dimensions = BTreeMap::new();
    for pair in pairs.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        let Some((name, value)) = pair.split_once('=') else {
            bail!("Invalid dimension '{}': expected KEY=VALUE", pair);
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("Invalid dimension '{}': empty name", pair);
        }
        dimensions.insert(name.to_string(), value.trim().to_string());
    }
    Ok(dimensions)
}
