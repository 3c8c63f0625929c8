//! Host lifecycle seam
//!
//! The job-processing host announces startup, leader election, quiet and
//! shutdown. The publisher only needs to hang callbacks off those events.

use futures_util::future::BoxFuture;
use std::sync::Mutex;
use tracing::{debug, info};

/// Lifecycle events raised by the host controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    /// Host process finished booting
    Startup,
    /// This instance became the cluster leader
    Leader,
    /// Host stops taking new work
    Quiet,
    /// Host is shutting down
    Shutdown,
}

/// Callback run when a lifecycle event fires
pub type LifecycleHook = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Host controller the publisher registers its lifecycle with
pub trait HostLifecycle: Send + Sync {
    /// Whether the host elects a single leader across the cluster
    fn supports_leader_election(&self) -> bool;

    /// Register a callback for `event`
    fn on(&self, event: LifecycleEvent, hook: LifecycleHook);
}

/// In-process host controller that stores hooks and fires them on demand
pub struct ProcessHost {
    leader_election: bool,
    hooks: Mutex<Vec<(LifecycleEvent, LifecycleHook)>>,
}

impl ProcessHost {
    pub fn new(leader_election: bool) -> Self {
        Self {
            leader_election,
            hooks: Mutex::new(Vec::new()),
        }
    }

    /// Number of hooks registered for `event`
    pub fn hook_count(&self, event: LifecycleEvent) -> usize {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .filter(|(e, _)| *e == event)
            .count()
    }

    /// Run every hook registered for `event`, in registration order
    pub async fn fire(&self, event: LifecycleEvent) {
        let pending: Vec<BoxFuture<'static, ()>> = {
            let hooks = self
                .hooks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            hooks
                .iter()
                .filter(|(e, _)| *e == event)
                .map(|(_, hook)| hook())
                .collect()
        };

        info!(event = ?event, hooks = pending.len(), "Firing lifecycle event");
        for fut in pending {
            fut.await;
        }
        debug!(event = ?event, "Lifecycle event handled");
    }
}

impl HostLifecycle for ProcessHost {
    fn supports_leader_election(&self) -> bool {
        self.leader_election
    }

    fn on(&self, event: LifecycleEvent, hook: LifecycleHook) {
        self.hooks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push((event, hook));
    }
}
