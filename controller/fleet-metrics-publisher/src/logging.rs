//! Logging setup and the optional external event logger
//!
//! Everything logs through `tracing`. Hosts that keep their own structured
//! logger can also receive retry and credential-refresh events through
//! [`EventLogger`], always under [`EXTERNAL_LOG_TOPIC`].

use serde_json::Value;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Topic attached to every event forwarded to an external logger
pub const EXTERNAL_LOG_TOPIC: &str = "fleet-metrics-publisher";

/// Structured logger supplied by the host
pub trait EventLogger: Send + Sync {
    fn log(&self, topic: &str, event: &str, fields: Value);
}

/// Forwards events to an optional external logger
#[derive(Clone, Default)]
pub struct EventForwarder {
    inner: Option<Arc<dyn EventLogger>>,
}

impl EventForwarder {
    pub fn new(inner: Option<Arc<dyn EventLogger>>) -> Self {
        Self { inner }
    }

    pub fn forward(&self, event: &str, fields: Value) {
        if let Some(logger) = &self.inner {
            logger.log(EXTERNAL_LOG_TOPIC, event, fields);
        }
    }
}

/// Install the global tracing subscriber for the binary
pub fn init_tracing(json: bool) {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
