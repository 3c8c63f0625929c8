//! Wires a publisher into a host's lifecycle
//!
//! Hosts with leader election start the publisher only on the leader, so a
//! cluster publishes once. Otherwise every instance publishes on startup and
//! the duplicates are tolerated.

use crate::config::{PublisherConfig, DEFAULT_INTERVAL, DEFAULT_NAMESPACE};
use crate::host::{HostLifecycle, LifecycleEvent};
use crate::logging::{EventForwarder, EventLogger};
use crate::publisher::Publisher;
use crate::stats::StatsSource;
use crate::transport::MetricsClient;
use futures_util::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Everything needed to activate a publisher
pub struct ActivationOptions<S: StatsSource, C: MetricsClient> {
    pub client: Arc<C>,
    pub source: Arc<S>,
    pub namespace: String,
    pub process_metrics: bool,
    pub additional_dimensions: BTreeMap<String, String>,
    pub logger: Option<Arc<dyn EventLogger>>,
    pub interval: Duration,
}

impl<S: StatsSource, C: MetricsClient> ActivationOptions<S, C> {
    /// Options with the default namespace, process metrics on, no extra dimensions
    pub fn new(client: Arc<C>, source: Arc<S>) -> Self {
        Self {
            client,
            source,
            namespace: DEFAULT_NAMESPACE.to_string(),
            process_metrics: true,
            additional_dimensions: BTreeMap::new(),
            logger: None,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Take namespace, process-metrics flag and dimensions from `config`
    pub fn with_config(mut self, config: PublisherConfig) -> Self {
        self.namespace = config.namespace;
        self.process_metrics = config.process_metrics_enabled;
        self.additional_dimensions = config.additional_dimensions;
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn EventLogger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Build a publisher and register its start/quiet/stop hooks with `host`
pub fn activate<S, C>(
    options: ActivationOptions<S, C>,
    host: &dyn HostLifecycle,
) -> Arc<Publisher<S, C>>
where
    S: StatsSource + 'static,
    C: MetricsClient + 'static,
{
    let config = PublisherConfig {
        namespace: options.namespace,
        process_metrics_enabled: options.process_metrics,
        additional_dimensions: options.additional_dimensions,
    };
    let publisher = Arc::new(
        Publisher::with_events(
            options.source,
            options.client,
            config,
            EventForwarder::new(options.logger),
        )
        .with_interval(options.interval),
    );

    let start_event = if host.supports_leader_election() {
        LifecycleEvent::Leader
    } else {
        LifecycleEvent::Startup
    };

    let p = publisher.clone();
    host.on(
        start_event,
        Box::new(move || {
            let p = p.clone();
            async move { p.start() }.boxed()
        }),
    );

    let p = publisher.clone();
    host.on(
        LifecycleEvent::Quiet,
        Box::new(move || {
            let p = p.clone();
            async move {
                if p.is_running() {
                    p.quiet();
                }
            }
            .boxed()
        }),
    );

    let p = publisher.clone();
    host.on(
        LifecycleEvent::Shutdown,
        Box::new(move || {
            let p = p.clone();
            async move {
                if p.is_running() {
                    p.stop().await;
                }
            }
            .boxed()
        }),
    );

    info!(
        namespace = %publisher.config().namespace,
        start_event = ?start_event,
        "Metrics publisher activated"
    );
    publisher
}
