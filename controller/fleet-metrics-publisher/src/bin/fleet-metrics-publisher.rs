//! Fleet Metrics Publisher binary - samples host stats and publishes metrics until Ctrl-C

use fleet_metrics_publisher::logging::init_tracing;
use fleet_metrics_publisher::{
    activate, ActivationOptions, Config, HttpMetricsClient, HttpStatsSource, LifecycleEvent,
    LogOnlyMetricsClient, MetricsClient, ProcessHost, TokenSource,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse configuration
    let config = Config::parse_config();

    init_tracing(config.log_json);

    info!("Starting Fleet Metrics Publisher");
    info!("Configuration:");
    info!("  Stats URL: {}", config.stats_url);
    info!("  Namespace: {}", config.namespace);
    info!("  Interval: {}s", config.interval().as_secs());
    info!("  Process metrics: {}", !config.disable_process_metrics);
    info!("  Leader election: {}", config.leader_election);
    info!("  Dry-run: {}", config.dry_run);

    let source = Arc::new(HttpStatsSource::new(
        config.stats_url.clone(),
        config.request_timeout_secs,
    )?);

    let endpoint = config
        .metrics_endpoint
        .clone()
        .filter(|_| config.has_metrics_endpoint());

    if let Some(endpoint) = endpoint {
        info!("Using HTTP metrics client with endpoint: {}", endpoint);

        let token_source = match (&config.metrics_token_file, &config.metrics_token) {
            (Some(path), _) => TokenSource::File(path.clone()),
            (None, Some(token)) => TokenSource::Static(token.clone()),
            (None, None) => TokenSource::None,
        };
        let client = Arc::new(
            HttpMetricsClient::new(endpoint, config.request_timeout_secs, token_source).await?,
        );

        run_publisher(config, source, client).await
    } else {
        info!("Using log-only metrics client (dry-run mode)");
        run_publisher(config, source, Arc::new(LogOnlyMetricsClient)).await
    }
}

/// Activate the publisher on an in-process host and drive its lifecycle
async fn run_publisher<C: MetricsClient + 'static>(
    config: Config,
    source: Arc<HttpStatsSource>,
    client: Arc<C>,
) -> anyhow::Result<()> {
    let host = ProcessHost::new(config.leader_election);
    let options = ActivationOptions::new(client, source)
        .with_config(config.publisher_config()?)
        .with_interval(config.interval());
    let publisher = activate(options, &host);

    // A standalone process is always its own leader.
    if config.leader_election {
        host.fire(LifecycleEvent::Leader).await;
    } else {
        host.fire(LifecycleEvent::Startup).await;
    }

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");

    host.fire(LifecycleEvent::Quiet).await;
    host.fire(LifecycleEvent::Shutdown).await;

    info!(state = ?publisher.state(), "Fleet metrics publisher exited");
    Ok(())
}
