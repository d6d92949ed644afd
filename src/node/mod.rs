pub mod simulated;

use crate::core::{Endpoint, Result};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, Weak};

pub use simulated::{SimulatedNode, SimulatedNodeFactory};

/// Handle to one cache server.
///
/// Implementations are supplied by the transport layer. The pool only relies on
/// identity, the liveness flag, a ping probe and an explicit release.
#[async_trait]
pub trait Node: Send + Sync {
    /// Network identity of the server.
    fn endpoint(&self) -> &Endpoint;

    /// Whether the transport currently considers the server reachable.
    fn is_alive(&self) -> bool;

    /// Probes a dead server. Returns true (and marks the node alive) when it answers.
    async fn ping(&self) -> bool;

    /// Releases transport resources. Called at most once by the pool.
    fn dispose(&self);
}

impl fmt::Debug for dyn Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("endpoint", self.endpoint())
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Receives failure signals from nodes. Implemented by the server pool.
pub(crate) trait FailureSink: Send + Sync {
    fn node_failed(&self, node: &Arc<dyn Node>);
}

/// Failure subscription handed to a node when it is created.
///
/// The node calls [`FailureNotifier::notify`] with itself once it decides the
/// server is gone. The owning pool handles the signal synchronously; if the pool
/// has been dropped the call does nothing.
#[derive(Clone)]
pub struct FailureNotifier {
    sink: Option<Weak<dyn FailureSink>>,
}

impl FailureNotifier {
    pub(crate) fn new(sink: Weak<dyn FailureSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// A notifier that is not attached to any pool.
    pub fn detached() -> Self {
        Self { sink: None }
    }

    /// Reports `node` as failed to the owning pool.
    pub fn notify(&self, node: &Arc<dyn Node>) {
        if let Some(sink) = self.sink.as_ref().and_then(Weak::upgrade) {
            sink.node_failed(node);
        }
    }

    pub fn is_attached(&self) -> bool {
        self.sink
            .as_ref()
            .map(|sink| sink.strong_count() > 0)
            .unwrap_or(false)
    }
}

impl fmt::Debug for FailureNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailureNotifier")
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Constructs nodes for endpoints. The pool calls this during `start` and `update`.
///
/// Runs with the pool lock held, so `create_node` must not raise the failure
/// signal on the node it is building.
pub trait NodeFactory: Send + Sync {
    fn create_node(&self, endpoint: &Endpoint, failures: FailureNotifier) -> Result<Arc<dyn Node>>;
}

/// True when both handles point at the same node instance.
pub fn same_node(a: &Arc<dyn Node>, b: &Arc<dyn Node>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
