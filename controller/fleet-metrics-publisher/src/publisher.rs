//! Publisher - the timed loop that samples host stats and ships metrics
//!
//! One background task per publisher. Each iteration fetches a snapshot,
//! builds the records and sends them through the batch transport. A failed
//! cycle ends the loop; the host is expected to start the publisher again.

use crate::builder::build_metrics;
use crate::config::{PublisherConfig, DEFAULT_INTERVAL};
use crate::logging::EventForwarder;
use crate::stats::StatsSource;
use crate::transport::{BatchTransport, MetricsClient};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Observable lifecycle of a publisher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    NotStarted,
    Running,
    Quiescing,
    Stopped,
}

/// Next wake-up instant: one interval after the previous tick, never in the past
pub fn next_tick(previous: Instant, interval: Duration, now: Instant) -> Instant {
    (previous + interval).max(now)
}

/// Stop signalling for a single run of the loop
struct RunControl {
    stop_requested: AtomicBool,
    wake: Notify,
    /// Flips to true once the loop task has exited
    finished: watch::Sender<bool>,
}

impl RunControl {
    fn new() -> Self {
        let (finished, _) = watch::channel(false);
        Self {
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
            finished,
        }
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn finished(&self) -> bool {
        *self.finished.borrow()
    }

    /// Resolves once the loop has exited; immediately if it already has
    async fn wait_finished(&self) {
        let mut rx = self.finished.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|done| *done).await;
    }
}

/// Marks the run finished however the loop exits, panics included
struct FinishGuard(Arc<RunControl>);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.finished.send_replace(true);
    }
}

struct Run {
    control: Arc<RunControl>,
    /// Taken by whoever joins the task
    handle: Option<JoinHandle<()>>,
}

/// Everything a cycle needs, shared with the background task
struct Shared<S: StatsSource, C: MetricsClient> {
    source: Arc<S>,
    transport: BatchTransport<C>,
    config: PublisherConfig,
}

impl<S: StatsSource, C: MetricsClient> Shared<S, C> {
    async fn publish_cycle(&self) -> Result<usize> {
        // Every record carries the instant the cycle started.
        let started_at = Utc::now();
        let snapshot = self
            .source
            .fetch_stats()
            .await
            .context("Failed to fetch host stats")?;

        let metrics = build_metrics(&snapshot, &self.config, started_at);

        let batches = self
            .transport
            .send_all(&self.config.namespace, &metrics)
            .await
            .context("Failed to send metrics")?;

        info!(
            namespace = %self.config.namespace,
            records = metrics.len(),
            batches = batches,
            "Published metrics"
        );
        Ok(metrics.len())
    }
}

/// Periodic metrics publisher with start/quiet/stop lifecycle
pub struct Publisher<S: StatsSource, C: MetricsClient> {
    shared: Arc<Shared<S, C>>,
    interval: Duration,
    run: Mutex<Option<Run>>,
}

impl<S: StatsSource + 'static, C: MetricsClient + 'static> Publisher<S, C> {
    /// Create a publisher with the default 60 second interval
    pub fn new(source: Arc<S>, client: Arc<C>, config: PublisherConfig) -> Self {
        Self::with_events(source, client, config, EventForwarder::default())
    }

    /// Create a publisher that also forwards retry events to an external logger
    pub fn with_events(
        source: Arc<S>,
        client: Arc<C>,
        config: PublisherConfig,
        events: EventForwarder,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                transport: BatchTransport::new(client, events),
                config,
            }),
            interval: DEFAULT_INTERVAL,
            run: Mutex::new(None),
        }
    }

    /// Override the publish interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.shared.config
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn lock_run(&self) -> MutexGuard<'_, Option<Run>> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Launch the background loop; no-op if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut run = self.lock_run();
        if run.as_ref().is_some_and(|r| !r.control.finished()) {
            debug!("Publisher already running; start ignored");
            return;
        }

        info!(
            namespace = %self.shared.config.namespace,
            interval_secs = self.interval.as_secs_f64(),
            "Starting metrics publisher"
        );

        let control = Arc::new(RunControl::new());
        let handle = tokio::spawn(run_loop(
            self.shared.clone(),
            control.clone(),
            self.interval,
        ));
        *run = Some(Run {
            control,
            handle: Some(handle),
        });
    }

    /// Ask the loop to exit after the current cycle without waking it
    pub fn quiet(&self) {
        if let Some(run) = self.lock_run().as_ref() {
            info!("Quieting metrics publisher");
            run.control.stop_requested.store(true, Ordering::SeqCst);
        }
    }

    /// Stop the loop, waking it if asleep, and wait for it to exit.
    ///
    /// Safe to call repeatedly, concurrently, or after the loop already died.
    /// Every caller returns only once the loop task has exited.
    pub async fn stop(&self) {
        let (control, handle) = {
            let mut run = self.lock_run();
            let Some(run) = run.as_mut() else {
                debug!("Publisher not started; stop ignored");
                return;
            };
            run.control.stop_requested.store(true, Ordering::SeqCst);
            run.control.wake.notify_one();
            (run.control.clone(), run.handle.take())
        };

        let Some(handle) = handle else {
            // Another caller owns the join; wait for the same exit.
            control.wait_finished().await;
            debug!("Publisher already stopped");
            return;
        };

        info!("Stopping metrics publisher");
        if let Err(e) = handle.await {
            if e.is_panic() {
                error!(error = %e, "Metrics publisher task panicked");
            }
        }
        info!("Metrics publisher stopped");
    }

    /// True while the background task exists and has not finished
    pub fn is_running(&self) -> bool {
        self.lock_run()
            .as_ref()
            .is_some_and(|r| !r.control.finished())
    }

    pub fn state(&self) -> LifecycleState {
        match self.lock_run().as_ref() {
            None => LifecycleState::NotStarted,
            Some(r) if r.control.finished() => LifecycleState::Stopped,
            Some(r) if r.control.stop_requested() => LifecycleState::Quiescing,
            Some(_) => LifecycleState::Running,
        }
    }

    /// Run a single publish cycle on the caller's task; returns the record count.
    ///
    /// Refused while the background loop is running, so the client is only
    /// ever driven from one task at a time.
    pub async fn publish_once(&self) -> Result<usize> {
        if self.is_running() {
            bail!("Publisher loop is running; publish_once is only for a stopped publisher");
        }
        self.shared.publish_cycle().await
    }
}

async fn run_loop<S: StatsSource, C: MetricsClient>(
    shared: Arc<Shared<S, C>>,
    control: Arc<RunControl>,
    interval: Duration,
) {
    let _finished = FinishGuard(control.clone());
    let mut tick = Instant::now();
    while !control.stop_requested() {
        if let Err(e) = shared.publish_cycle().await {
            // Fatal for the loop; the publisher stays down until restarted.
            error!(error = ?e, "Metrics publish cycle failed; publisher loop exiting");
            return;
        }

        let now = Instant::now();
        tick = next_tick(tick, interval, now);
        if tick > now && !control.stop_requested() {
            tokio::select! {
                _ = tokio::time::sleep_until(tick) => {}
                _ = control.wake.notified() => {
                    debug!("Publisher woken for shutdown");
                }
            }
        } else if tick <= now {
            warn!("Publish cycle overran the interval; publishing again immediately");
        }
    }
    info!("Metrics publisher loop exited");
}
