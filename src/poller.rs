//! Periodic topology refresh
//!
//! The poller asks a [`DiscoveryClient`] for the current configuration version
//! and endpoints and pushes them into its target whenever the version moved or
//! the endpoint count no longer matches the working node count. A failed read
//! is retried once after re-resolving the discovery endpoint; if that fails too
//! the target is emptied so that routing reports "no node" instead of using a
//! stale membership.

use crate::core::{ClusterError, Endpoint, Result};
use crate::discovery::{ClusterVersion, DiscoveryClient, Topology};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Something whose membership the poller keeps current. Implemented by the server pool.
pub trait MembershipTarget: Send + Sync {
    fn working_node_count(&self) -> usize;

    fn update(&self, endpoints: Vec<Endpoint>) -> Result<()>;
}

/// Result of one poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Version and endpoint count unchanged
    Unchanged,
    /// Target updated to the topology at `version`
    Updated { version: ClusterVersion, endpoints: usize },
    /// Discovery stayed unreachable; the target was emptied
    FellBackToEmpty,
    /// The target refused the update
    Rejected,
    /// The target no longer exists
    TargetGone,
}

struct PollerInner {
    discovery: Arc<dyn DiscoveryClient>,
    target: Weak<dyn MembershipTarget>,
    interval: Duration,
    last_version: Mutex<Option<ClusterVersion>>,
}

/// Periodic reconfiguration task
pub struct ConfigurationPoller {
    inner: Arc<PollerInner>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConfigurationPoller {
    /// Creates a stopped poller. A zero `interval` is rejected.
    pub fn new(
        discovery: Arc<dyn DiscoveryClient>,
        target: Weak<dyn MembershipTarget>,
        interval: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(ClusterError::InvalidConfig(
                "poll interval must be > 0".to_string(),
            ));
        }
        let (stop, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(PollerInner {
                discovery,
                target,
                interval,
                last_version: Mutex::new(None),
            }),
            stop,
            task: Mutex::new(None),
        })
    }

    /// Records the version the target's current membership was read at
    pub fn seed_version(&self, version: ClusterVersion) {
        *self.inner.last_version.lock() = Some(version);
    }

    /// Last version applied to the target
    pub fn last_version(&self) -> Option<ClusterVersion> {
        self.inner.last_version.lock().clone()
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    /// Starts ticking on `runtime`. The first tick runs immediately.
    ///
    /// Calling this on a running or stopped poller does nothing.
    pub fn start(&self, runtime: &Handle) {
        let mut task = self.task.lock();
        if task.is_some() || *self.stop.borrow() {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let mut stop = self.stop.subscribe();
        *task = Some(runtime.spawn(async move {
            let mut ticker = tokio::time::interval(inner.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = stop.changed() => break,
                    _ = ticker.tick() => {
                        if *stop.borrow() {
                            break;
                        }
                        if inner.poll_once().await == PollOutcome::TargetGone {
                            break;
                        }
                    }
                }
            }
            debug!("configuration poller stopped");
        }));
        debug!(interval = ?self.inner.interval, "configuration poller started");
    }

    /// Runs one check outside the timer
    pub async fn poll_once(&self) -> PollOutcome {
        self.inner.poll_once().await
    }

    /// Stops further ticks. A tick already running completes. Idempotent.
    pub fn stop(&self) {
        self.stop.send_replace(true);
        self.task.lock().take();
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop.borrow()
    }
}

impl Drop for ConfigurationPoller {
    fn drop(&mut self) {
        self.stop.send_replace(true);
    }
}

impl PollerInner {
    async fn poll_once(&self) -> PollOutcome {
        let Some(target) = self.target.upgrade() else {
            return PollOutcome::TargetGone;
        };

        let topology = match self.discovery.topology().await {
            Ok(topology) => topology,
            Err(err) => {
                debug!(error = %err, "error updating endpoints, re-resolving the configuration endpoint");
                match self.recover().await {
                    Ok(topology) => topology,
                    Err(err) => {
                        warn!(error = %err, "discovery is unreachable, dropping all nodes");
                        return match target.update(Vec::new()) {
                            Ok(()) => PollOutcome::FellBackToEmpty,
                            Err(err) => Self::rejected(err),
                        };
                    }
                }
            }
        };

        self.apply(target.as_ref(), topology)
    }

    async fn recover(&self) -> Result<Topology> {
        self.discovery.reresolve().await?;
        self.discovery.topology().await
    }

    fn apply(&self, target: &dyn MembershipTarget, topology: Topology) -> PollOutcome {
        let mut last_version = self.last_version.lock();
        let version_changed = last_version.as_ref() != Some(&topology.version);
        let count_changed = topology.endpoints.len() != target.working_node_count();
        if !version_changed && !count_changed {
            return PollOutcome::Unchanged;
        }

        info!(
            version = %topology.version,
            endpoints = topology.endpoints.len(),
            version_changed,
            "cluster configuration changed"
        );
        let endpoints = topology.endpoints.len();
        match target.update(topology.endpoints) {
            Ok(()) => {
                *last_version = Some(topology.version.clone());
                PollOutcome::Updated {
                    version: topology.version,
                    endpoints,
                }
            }
            Err(err) => Self::rejected(err),
        }
    }

    fn rejected(err: ClusterError) -> PollOutcome {
        match err {
            ClusterError::PoolDisposed => PollOutcome::TargetGone,
            err => {
                warn!(error = %err, "membership update failed");
                PollOutcome::Rejected
            }
        }
    }
}
