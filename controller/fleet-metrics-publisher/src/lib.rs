//! Fleet Metrics Publisher - reports job-processing host statistics to a metrics service
//!
//! A [`Publisher`] wakes on a fixed interval, samples a [`StatsSnapshot`] from
//! the host, derives queue, capacity and utilization metrics, and sends them
//! in batches to a metrics-ingestion service. Hosts wire it in through
//! [`activate`], which hooks start/quiet/stop onto the host's lifecycle.

pub mod activation;
pub mod builder;
pub mod config;
pub mod host;
pub mod logging;
pub mod metric;
pub mod publisher;
pub mod stats;
pub mod transport;
pub mod utilization;

pub use activation::{activate, ActivationOptions};
pub use builder::build_metrics;
pub use config::{Config, PublisherConfig};
pub use host::{HostLifecycle, LifecycleEvent, ProcessHost};
pub use logging::{EventForwarder, EventLogger};
pub use metric::{Dimension, MetricRecord, Unit};
pub use publisher::{LifecycleState, Publisher};
pub use stats::{HttpStatsSource, ProcessDescriptor, QueueDescriptor, StatsSnapshot, StatsSource};
pub use transport::{
    BatchTransport, HttpMetricsClient, LogOnlyMetricsClient, MetricsClient, TokenSource,
    TransportError,
};
