//! Metrics-service clients and the batching transport
//!
//! [`BatchTransport`] splits a cycle's records into chunks the ingestion API
//! accepts and sends them one after another. Expired credentials are the only
//! retried failure; everything else aborts the cycle.

use crate::logging::EventForwarder;
use crate::metric::MetricRecord;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Maximum records per send call accepted by the ingestion API
pub const MAX_BATCH_SIZE: usize = 20;

/// Credential refreshes allowed per chunk before giving up
pub const MAX_TOKEN_REFRESHES: u32 = 3;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Authentication token expired: {message}")]
    ExpiredToken { message: String },

    #[error("Metrics service rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Credential refresh failed: {message}")]
    Credentials { message: String },
}

/// What the transport does after a failed send
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryWithRefresh,
    Fatal,
}

/// Retry policy: only token expiry is worth a credential refresh
pub fn classify(error: &TransportError) -> RetryDecision {
    match error {
        TransportError::ExpiredToken { .. } => RetryDecision::RetryWithRefresh,
        _ => RetryDecision::Fatal,
    }
}

/// Metrics-service client - implement this to target a different ingestion API
#[async_trait]
pub trait MetricsClient: Send + Sync {
    /// Send one batch of at most [`MAX_BATCH_SIZE`] records
    async fn put_metric_data(
        &self,
        namespace: &str,
        metric_data: &[MetricRecord],
    ) -> Result<(), TransportError>;

    /// Reload credentials used by subsequent sends
    async fn refresh_credentials(&self) -> Result<(), TransportError>;
}

/// Sends a cycle's records in ordered chunks with the token-refresh policy
pub struct BatchTransport<C: MetricsClient> {
    client: Arc<C>,
    events: EventForwarder,
}

impl<C: MetricsClient> BatchTransport<C> {
    pub fn new(client: Arc<C>, events: EventForwarder) -> Self {
        Self { client, events }
    }

    /// Send all records; returns the number of chunks sent.
    ///
    /// Stops at the first chunk that fails fatally; later chunks are not tried.
    pub async fn send_all(
        &self,
        namespace: &str,
        metrics: &[MetricRecord],
    ) -> Result<usize, TransportError> {
        let mut sent = 0;
        for (index, chunk) in metrics.chunks(MAX_BATCH_SIZE).enumerate() {
            self.send_chunk(namespace, index, chunk).await?;
            sent += 1;
        }
        Ok(sent)
    }

    async fn send_chunk(
        &self,
        namespace: &str,
        index: usize,
        chunk: &[MetricRecord],
    ) -> Result<(), TransportError> {
        let mut retries = 0;
        loop {
            let err = match self.client.put_metric_data(namespace, chunk).await {
                Ok(()) => {
                    debug!(
                        namespace = %namespace,
                        chunk = index,
                        records = chunk.len(),
                        "Sent metrics chunk"
                    );
                    return Ok(());
                }
                Err(e) => e,
            };

            if classify(&err) == RetryDecision::Fatal || retries >= MAX_TOKEN_REFRESHES {
                warn!(
                    namespace = %namespace,
                    chunk = index,
                    retries = retries,
                    error = %err,
                    "Giving up on metrics chunk"
                );
                return Err(err);
            }

            retries += 1;
            warn!(
                chunk = index,
                retry = retries,
                max_retries = MAX_TOKEN_REFRESHES,
                error = %err,
                "Metrics service token expired; refreshing credentials"
            );
            self.events.forward(
                "token_expired",
                json!({ "chunk": index, "retry": retries, "error": err.to_string() }),
            );

            self.client.refresh_credentials().await?;

            info!(chunk = index, retry = retries, "Refreshed metrics credentials");
            self.events
                .forward("credentials_refreshed", json!({ "chunk": index, "retry": retries }));
        }
    }
}

/// Log-only metrics client (dry-run implementation)
pub struct LogOnlyMetricsClient;

#[async_trait]
impl MetricsClient for LogOnlyMetricsClient {
    async fn put_metric_data(
        &self,
        namespace: &str,
        metric_data: &[MetricRecord],
    ) -> Result<(), TransportError> {
        for record in metric_data {
            info!(
                namespace = %namespace,
                metric = %record.metric_name,
                value = record.value,
                unit = ?record.unit,
                dimensions = ?record.dimensions,
                "Metric (log-only mode)"
            );
        }
        Ok(())
    }

    async fn refresh_credentials(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Where the HTTP client gets its bearer token
#[derive(Debug, Clone)]
pub enum TokenSource {
    None,
    Static(String),
    /// Re-read from disk on every refresh
    File(PathBuf),
}

impl TokenSource {
    async fn load(&self) -> Result<Option<String>, TransportError> {
        match self {
            TokenSource::None => Ok(None),
            TokenSource::Static(token) => Ok(Some(token.clone())),
            TokenSource::File(path) => {
                let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
                    TransportError::Credentials {
                        message: format!("failed to read {}: {}", path.display(), e),
                    }
                })?;
                Ok(Some(raw.trim().to_string()))
            }
        }
    }
}

/// HTTP metrics client - POSTs batches as JSON to the ingestion endpoint
pub struct HttpMetricsClient {
    endpoint: String,
    client: reqwest::Client,
    token_source: TokenSource,
    token: RwLock<Option<String>>,
}

/// Payload of one send call
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutMetricDataRequest<'a> {
    namespace: &'a str,
    metric_data: &'a [MetricRecord],
}

/// Error body returned by the ingestion service
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default, alias = "__type")]
    code: Option<String>,
}

impl HttpMetricsClient {
    /// Create a new HTTP metrics client, loading the initial token
    pub async fn new(
        endpoint: String,
        timeout_secs: u64,
        token_source: TokenSource,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        let token = token_source
            .load()
            .await
            .context("Failed to load metrics credentials")?;

        Ok(Self {
            endpoint,
            client,
            token_source,
            token: RwLock::new(token),
        })
    }
}

fn is_expired_token(body: &str) -> bool {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    matches!(
        parsed.code.as_deref(),
        Some("ExpiredToken") | Some("ExpiredTokenException")
    )
}

#[async_trait]
impl MetricsClient for HttpMetricsClient {
    async fn put_metric_data(
        &self,
        namespace: &str,
        metric_data: &[MetricRecord],
    ) -> Result<(), TransportError> {
        let request = PutMetricDataRequest {
            namespace,
            metric_data,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(token) = self.token.read().await.as_deref() {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unable to read body>".to_string());

        if is_expired_token(&body) {
            Err(TransportError::ExpiredToken { message: body })
        } else {
            Err(TransportError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    async fn refresh_credentials(&self) -> Result<(), TransportError> {
        let token = self.token_source.load().await?;
        *self.token.write().await = token;
        Ok(())
    }
}
