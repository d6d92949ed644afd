use super::{FailureNotifier, Node, NodeFactory};
use crate::auth::AuthenticationProvider;
use crate::core::{ClusterError, Endpoint, Result};
use crate::pool::BinaryTransport;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// An in-process node used for tests and the demo CLI.
///
/// Liveness is driven by hand: [`SimulatedNode::fail`] marks the node dead and
/// raises the failure signal, [`SimulatedNode::set_reachable`] controls whether
/// the next ping brings it back.
pub struct SimulatedNode {
    me: Weak<SimulatedNode>,
    endpoint: Endpoint,
    alive: AtomicBool,
    reachable: AtomicBool,
    pings: AtomicUsize,
    disposals: AtomicUsize,
    failures: FailureNotifier,
    authenticator: Option<Arc<dyn AuthenticationProvider>>,
}

impl SimulatedNode {
    pub fn new(endpoint: Endpoint, failures: FailureNotifier) -> Arc<Self> {
        Self::with_authenticator(endpoint, failures, None)
    }

    pub fn with_authenticator(
        endpoint: Endpoint,
        failures: FailureNotifier,
        authenticator: Option<Arc<dyn AuthenticationProvider>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            endpoint,
            alive: AtomicBool::new(true),
            reachable: AtomicBool::new(true),
            pings: AtomicUsize::new(0),
            disposals: AtomicUsize::new(0),
            failures,
            authenticator,
        })
    }

    /// Marks the server as gone and notifies the owning pool.
    pub fn fail(&self) {
        self.reachable.store(false, Ordering::SeqCst);
        let was_alive = self.alive.swap(false, Ordering::SeqCst);
        if was_alive {
            if let Some(me) = self.me.upgrade() {
                let node: Arc<dyn Node> = me;
                self.failures.notify(&node);
            }
        }
    }

    /// Controls whether the next ping succeeds.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn dispose_count(&self) -> usize {
        self.disposals.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.dispose_count() > 0
    }

    pub fn authenticator(&self) -> Option<&Arc<dyn AuthenticationProvider>> {
        self.authenticator.as_ref()
    }

    pub fn as_node(self: &Arc<Self>) -> Arc<dyn Node> {
        self.clone()
    }
}

#[async_trait]
impl Node for SimulatedNode {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn ping(&self) -> bool {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if self.reachable.load(Ordering::SeqCst) {
            self.alive.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn dispose(&self) {
        self.disposals.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }
}

/// Creates [`SimulatedNode`]s and remembers every node it handed out.
#[derive(Default)]
pub struct SimulatedNodeFactory {
    created: Mutex<Vec<Arc<SimulatedNode>>>,
    rejected: Mutex<HashSet<Endpoint>>,
}

impl SimulatedNodeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `create_node` fail for `endpoint`, as if the transport could not be set up.
    pub fn reject(&self, endpoint: &Endpoint) {
        self.rejected.lock().insert(endpoint.clone());
    }

    /// All nodes created so far, oldest first.
    pub fn created(&self) -> Vec<Arc<SimulatedNode>> {
        self.created.lock().clone()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().len()
    }

    /// The most recently created node for `endpoint`.
    pub fn latest(&self, endpoint: &Endpoint) -> Option<Arc<SimulatedNode>> {
        self.created
            .lock()
            .iter()
            .rev()
            .find(|node| node.endpoint() == endpoint)
            .cloned()
    }

    fn build(
        &self,
        endpoint: &Endpoint,
        failures: FailureNotifier,
        authenticator: Option<Arc<dyn AuthenticationProvider>>,
    ) -> Result<Arc<dyn Node>> {
        if self.rejected.lock().contains(endpoint) {
            return Err(ClusterError::NodeError(format!(
                "transport refused endpoint {}",
                endpoint
            )));
        }
        let node = SimulatedNode::with_authenticator(endpoint.clone(), failures, authenticator);
        self.created.lock().push(Arc::clone(&node));
        Ok(node)
    }
}

impl NodeFactory for SimulatedNodeFactory {
    fn create_node(&self, endpoint: &Endpoint, failures: FailureNotifier) -> Result<Arc<dyn Node>> {
        self.build(endpoint, failures, None)
    }
}

impl BinaryTransport for SimulatedNodeFactory {
    fn connect(
        &self,
        endpoint: &Endpoint,
        authenticator: Option<Arc<dyn AuthenticationProvider>>,
        failures: FailureNotifier,
    ) -> Result<Arc<dyn Node>> {
        self.build(endpoint, failures, authenticator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_fail_and_ping_cycle() {
        let node = SimulatedNode::new(ep("a:1"), FailureNotifier::detached());
        assert!(node.is_alive());

        node.fail();
        assert!(!node.is_alive());
        assert!(!node.ping().await);

        node.set_reachable(true);
        assert!(node.ping().await);
        assert!(node.is_alive());
        assert_eq!(node.ping_count(), 2);
    }

    #[test]
    fn test_factory_tracks_and_rejects() {
        let factory = SimulatedNodeFactory::new();
        factory.reject(&ep("bad:1"));

        assert!(factory.create_node(&ep("a:1"), FailureNotifier::detached()).is_ok());
        assert!(factory.create_node(&ep("bad:1"), FailureNotifier::detached()).is_err());
        assert!(factory.create_node(&ep("a:1"), FailureNotifier::detached()).is_ok());

        assert_eq!(factory.created_count(), 2);
        let latest = factory.latest(&ep("a:1")).unwrap();
        assert!(Arc::ptr_eq(&latest, &factory.created()[1]));
    }
}
