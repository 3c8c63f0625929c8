//! Assembles the metric records for one publish cycle
//!
//! Record order is stable: scalar counters, capacity, fleet utilization,
//! per-tag utilization, per-process utilization, then per-queue metrics.

use crate::config::PublisherConfig;
use crate::metric::{Dimension, MetricRecord, Unit};
use crate::stats::{ProcessDescriptor, StatsSnapshot};
use crate::utilization;
use chrono::{DateTime, Utc};

pub const DIMENSION_TAG: &str = "Tag";
pub const DIMENSION_HOSTNAME: &str = "Hostname";
pub const DIMENSION_QUEUE_NAME: &str = "QueueName";

/// Build the ordered record list for `snapshot`, stamping every record with `now`
pub fn build_metrics(
    snapshot: &StatsSnapshot,
    config: &PublisherConfig,
    now: DateTime<Utc>,
) -> Vec<MetricRecord> {
    let count = |name: &str, value: u64| MetricRecord::new(name, now, value as f64, Unit::Count);

    let mut metrics = vec![
        count("ProcessedJobs", snapshot.processed),
        count("FailedJobs", snapshot.failed),
        count("EnqueuedJobs", snapshot.enqueued),
        count("ScheduledJobs", snapshot.scheduled_size),
        count("RetryJobs", snapshot.retry_size),
        count("DeadJobs", snapshot.dead_size),
        count("Workers", snapshot.workers_size),
        count("Processes", snapshot.processes_size),
        MetricRecord::new(
            "DefaultQueueLatency",
            now,
            snapshot.default_queue_latency_seconds,
            Unit::Seconds,
        ),
        count("Capacity", utilization::capacity(&snapshot.processes)),
    ];

    if let Some(mean) = utilization::mean(&snapshot.processes) {
        metrics.push(percent(now, mean));
    }

    for (tag, group) in group_by_tag(&snapshot.processes) {
        if let Some(mean) = utilization::mean(group) {
            metrics.push(percent(now, mean).with_dimension(DIMENSION_TAG, tag));
        }
    }

    if config.process_metrics_enabled {
        for process in &snapshot.processes {
            let Some(ratio) = utilization::ratio(process) else {
                continue;
            };
            let mut record =
                percent(now, ratio).with_dimension(DIMENSION_HOSTNAME, &process.hostname);
            if let Some(tag) = process.tag() {
                record = record.with_dimension(DIMENSION_TAG, tag);
            }
            metrics.push(record);
        }
    }

    for queue in &snapshot.queues {
        metrics.push(
            MetricRecord::new("QueueSize", now, queue.size as f64, Unit::Count)
                .with_dimension(DIMENSION_QUEUE_NAME, &queue.name),
        );
        metrics.push(
            MetricRecord::new("QueueLatency", now, queue.latency_seconds, Unit::Seconds)
                .with_dimension(DIMENSION_QUEUE_NAME, &queue.name),
        );
    }

    if !config.additional_dimensions.is_empty() {
        let extra: Vec<Dimension> = config
            .additional_dimensions
            .iter()
            .map(|(name, value)| Dimension::new(name, value))
            .collect();
        for record in &mut metrics {
            record.dimensions.extend(extra.iter().cloned());
        }
    }

    metrics
}

fn percent(now: DateTime<Utc>, fraction: f64) -> MetricRecord {
    MetricRecord::new("Utilization", now, fraction * 100.0, Unit::Percent)
}

/// Group tagged processes by tag, in first-seen order; untagged ones are dropped
fn group_by_tag(processes: &[ProcessDescriptor]) -> Vec<(&str, Vec<&ProcessDescriptor>)> {
    let mut groups: Vec<(&str, Vec<&ProcessDescriptor>)> = Vec::new();
    for process in processes {
        let Some(tag) = process.tag() else {
            continue;
        };
        match groups.iter_mut().find(|(t, _)| *t == tag) {
            Some((_, members)) => members.push(process),
            None => groups.push((tag, vec![process])),
        }
    }
    groups
}
