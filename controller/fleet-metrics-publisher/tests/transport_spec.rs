//! Batch transport tests
//!
//! Tests cover:
//! - Chunking into ordered batches of at most 20 records
//! - Token-expiry retry with credential refresh
//! - Fatal errors aborting the remaining chunks
//! - HTTP client wire format and error mapping

use async_trait::async_trait;
use chrono::Utc;
use fleet_metrics_publisher::logging::{EventForwarder, EventLogger};
use fleet_metrics_publisher::transport::{MAX_BATCH_SIZE, MAX_TOKEN_REFRESHES};
use fleet_metrics_publisher::{
    BatchTransport, HttpMetricsClient, MetricRecord, MetricsClient, TokenSource, TransportError,
    Unit,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

/// Client that follows a per-call script (`None` succeeds) and records what it sends
#[derive(Default)]
struct ScriptedClient {
    script: Mutex<VecDeque<Option<TransportError>>>,
    sent: Mutex<Vec<Vec<String>>>,
    calls: AtomicUsize,
    refreshes: AtomicUsize,
}

impl ScriptedClient {
    fn failing_with(errors: Vec<TransportError>) -> Self {
        Self::scripted(errors.into_iter().map(Some).collect())
    }

    fn scripted(script: Vec<Option<TransportError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            ..Default::default()
        }
    }

    fn batch_sizes(&self) -> Vec<usize> {
        self.sent.lock().unwrap().iter().map(|b| b.len()).collect()
    }
}

#[async_trait]
impl MetricsClient for ScriptedClient {
    async fn put_metric_data(
        &self,
        _namespace: &str,
        metric_data: &[MetricRecord],
    ) -> Result<(), TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(Some(err)) = self.script.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.sent
            .lock()
            .unwrap()
            .push(metric_data.iter().map(|m| m.metric_name.clone()).collect());
        Ok(())
    }

    async fn refresh_credentials(&self) -> Result<(), TransportError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingLogger(Mutex<Vec<(String, String)>>);

impl EventLogger for RecordingLogger {
    fn log(&self, topic: &str, event: &str, _fields: Value) {
        self.0
            .lock()
            .unwrap()
            .push((topic.to_string(), event.to_string()));
    }
}

fn expired() -> TransportError {
    TransportError::ExpiredToken {
        message: "token expired".to_string(),
    }
}

fn records(n: usize) -> Vec<MetricRecord> {
    let now = Utc::now();
    (0..n)
        .map(|i| MetricRecord::new(format!("Metric{}", i), now, i as f64, Unit::Count))
        .collect()
}

fn transport(client: Arc<ScriptedClient>) -> BatchTransport<ScriptedClient> {
    BatchTransport::new(client, EventForwarder::default())
}

#[tokio::test]
async fn test_25_metrics_sent_as_20_and_5() {
    let client = Arc::new(ScriptedClient::default());

    let batches = transport(client.clone())
        .send_all("JobWorkers", &records(25))
        .await
        .unwrap();

    assert_eq!(batches, 2);
    assert_eq!(client.batch_sizes(), vec![20, 5]);
}

#[tokio::test]
async fn test_chunks_cover_records_in_order() {
    for n in [0, 1, 19, 20, 21, 40, 41, 99] {
        let client = Arc::new(ScriptedClient::default());
        let input = records(n);

        let batches = transport(client.clone())
            .send_all("JobWorkers", &input)
            .await
            .unwrap();

        assert_eq!(batches, n.div_ceil(MAX_BATCH_SIZE));
        let sent: Vec<String> = client.sent.lock().unwrap().concat();
        let expected: Vec<String> = input.iter().map(|m| m.metric_name.clone()).collect();
        assert_eq!(sent, expected);
        assert!(client.batch_sizes().iter().all(|&s| s <= MAX_BATCH_SIZE));
    }
}

#[tokio::test]
async fn test_four_expired_tokens_refresh_three_times_then_fail() {
    let client = Arc::new(ScriptedClient::failing_with(vec![
        expired(),
        expired(),
        expired(),
        expired(),
    ]));

    let result = transport(client.clone())
        .send_all("JobWorkers", &records(5))
        .await;

    assert!(matches!(result, Err(TransportError::ExpiredToken { .. })));
    assert_eq!(
        client.refreshes.load(Ordering::SeqCst),
        MAX_TOKEN_REFRESHES as usize
    );
    assert_eq!(client.calls.load(Ordering::SeqCst), 4);
    assert!(client.batch_sizes().is_empty());
}

#[tokio::test]
async fn test_three_expired_tokens_then_success() {
    let client = Arc::new(ScriptedClient::failing_with(vec![
        expired(),
        expired(),
        expired(),
    ]));

    let batches = transport(client.clone())
        .send_all("JobWorkers", &records(5))
        .await
        .unwrap();

    assert_eq!(batches, 1);
    assert_eq!(client.refreshes.load(Ordering::SeqCst), 3);
    assert_eq!(client.batch_sizes(), vec![5]);
}

#[tokio::test]
async fn test_retry_budget_is_per_chunk() {
    // Chunk 1 burns two refreshes, chunk 2 may still use all three.
    let client = Arc::new(ScriptedClient::scripted(vec![
        Some(expired()),
        Some(expired()),
        None,
        Some(expired()),
        Some(expired()),
        Some(expired()),
        None,
    ]));

    let batches = transport(client.clone())
        .send_all("JobWorkers", &records(40))
        .await
        .unwrap();

    assert_eq!(batches, 2);
    assert_eq!(client.refreshes.load(Ordering::SeqCst), 5);
    assert_eq!(client.batch_sizes(), vec![20, 20]);
}

#[tokio::test]
async fn test_fatal_error_skips_later_chunks() {
    let client = Arc::new(ScriptedClient::failing_with(vec![TransportError::Rejected {
        status: 400,
        body: "InvalidParameterValue".to_string(),
    }]));

    let result = transport(client.clone())
        .send_all("JobWorkers", &records(45))
        .await;

    assert!(matches!(
        result,
        Err(TransportError::Rejected { status: 400, .. })
    ));
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    assert_eq!(client.refreshes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_fatal_error_on_second_chunk_keeps_first() {
    let client = Arc::new(ScriptedClient::scripted(vec![
        None,
        Some(TransportError::Rejected {
            status: 500,
            body: "boom".to_string(),
        }),
    ]));

    let result = transport(client.clone())
        .send_all("JobWorkers", &records(45))
        .await;

    assert!(result.is_err());
    assert_eq!(client.batch_sizes(), vec![20]);
    assert_eq!(client.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retry_events_forwarded_to_external_logger() {
    let client = Arc::new(ScriptedClient::failing_with(vec![expired()]));
    let logger = Arc::new(RecordingLogger::default());
    let transport = BatchTransport::new(client, EventForwarder::new(Some(logger.clone())));

    transport
        .send_all("JobWorkers", &records(3))
        .await
        .unwrap();

    let events = logger.0.lock().unwrap();
    let names: Vec<&str> = events.iter().map(|(_, e)| e.as_str()).collect();
    assert_eq!(names, vec!["token_expired", "credentials_refreshed"]);
    assert!(events
        .iter()
        .all(|(topic, _)| topic == fleet_metrics_publisher::logging::EXTERNAL_LOG_TOPIC));
}

#[tokio::test]
async fn test_http_client_sends_namespaced_batch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/metrics"))
        .and(header("authorization", "Bearer secret"))
        .and(body_partial_json(json!({ "namespace": "JobWorkers" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpMetricsClient::new(
        format!("{}/metrics", mock_server.uri()),
        10,
        TokenSource::Static("secret".to_string()),
    )
    .await
    .unwrap();

    let result = client.put_metric_data("JobWorkers", &records(2)).await;
    assert!(result.is_ok(), "HTTP client should succeed with 200 response");

    let requests = mock_server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    let data = body["metricData"].as_array().unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["metricName"], "Metric0");
    assert_eq!(data[0]["unit"], "Count");
    assert_eq!(data[1]["value"], 1.0);
    assert!(data[0]["timestamp"].is_string());
    assert_eq!(data[0]["dimensions"], json!([]));
}

#[tokio::test]
async fn test_http_client_maps_rejection() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/metrics"))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpMetricsClient::new(
        format!("{}/metrics", mock_server.uri()),
        10,
        TokenSource::None,
    )
    .await
    .unwrap();

    let err = client
        .put_metric_data("JobWorkers", &records(1))
        .await
        .unwrap_err();
    match err {
        TransportError::Rejected { status, body } => {
            assert_eq!(status, 500);
            assert_eq!(body, "internal error");
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_http_client_refreshes_token_from_file() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/metrics"))
        .and(header("authorization", "Bearer old-token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "ExpiredToken",
            "message": "The security token included in the request is expired"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/metrics"))
        .and(header("authorization", "Bearer new-token"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&mock_server)
        .await;

    let token_file = tempfile::NamedTempFile::new().unwrap();
    std::fs::write(token_file.path(), "old-token\n").unwrap();

    let client = Arc::new(
        HttpMetricsClient::new(
            format!("{}/metrics", mock_server.uri()),
            10,
            TokenSource::File(token_file.path().to_path_buf()),
        )
        .await
        .unwrap(),
    );

    // Rotated on disk; the client still holds the old one until it expires.
    std::fs::write(token_file.path(), "new-token\n").unwrap();

    let transport = BatchTransport::new(client, EventForwarder::default());
    let batches = transport
        .send_all("JobWorkers", &records(30))
        .await
        .unwrap();

    assert_eq!(batches, 2);
}
