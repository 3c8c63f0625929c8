//! Host statistics snapshot and the sources that supply it
//!
//! A snapshot is taken once per publish cycle and never mutated afterwards.
//! The host system computes the numbers; this crate only reads them.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// One worker process as reported by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessDescriptor {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub busy: u64,
    pub concurrency: u64,
}

impl ProcessDescriptor {
    pub fn new(hostname: impl Into<String>, busy: u64, concurrency: u64) -> Self {
        Self {
            hostname: hostname.into(),
            tag: None,
            busy,
            concurrency,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Tag value, treating an empty string the same as no tag
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref().filter(|t| !t.is_empty())
    }
}

/// One job queue as reported by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueDescriptor {
    pub name: String,
    pub size: u64,
    pub latency_seconds: f64,
}

impl QueueDescriptor {
    pub fn new(name: impl Into<String>, size: u64, latency_seconds: f64) -> Self {
        Self {
            name: name.into(),
            size,
            latency_seconds,
        }
    }
}

/// Point-in-time statistics for the whole job-processing host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub processed: u64,
    pub failed: u64,
    pub enqueued: u64,
    pub scheduled_size: u64,
    pub retry_size: u64,
    pub dead_size: u64,
    pub workers_size: u64,
    pub processes_size: u64,
    pub default_queue_latency_seconds: f64,
    #[serde(default)]
    pub processes: Vec<ProcessDescriptor>,
    #[serde(default)]
    pub queues: Vec<QueueDescriptor>,
}

/// Supplies a fresh snapshot each time it is asked
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn fetch_stats(&self) -> Result<StatsSnapshot>;
}

/// Reads snapshots from a host's HTTP stats endpoint (JSON body)
pub struct HttpStatsSource {
    url: String,
    client: reqwest::Client,
}

impl HttpStatsSource {
    pub fn new(url: String, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { url, client })
    }
}

#[async_trait]
impl StatsSource for HttpStatsSource {
    async fn fetch_stats(&self) -> Result<StatsSnapshot> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("Failed to fetch stats from {}", self.url))?
            .error_for_status()
            .context("Stats endpoint returned error status")?;

        let snapshot: StatsSnapshot = response
            .json()
            .await
            .context("Failed to decode stats snapshot")?;

        debug!(
            processes = snapshot.processes.len(),
            queues = snapshot.queues.len(),
            "Fetched stats snapshot"
        );
        Ok(snapshot)
    }
}
