pub mod binary;
mod timer;

use crate::config::{ClusterConfig, Protocol};
use crate::core::{ClusterError, Endpoint, Result};
use crate::discovery::{ClusterVersion, DiscoveryClient};
use crate::locator::{LocatorFactory, NodeLocator};
use crate::node::{FailureNotifier, FailureSink, Node, NodeFactory, same_node};
use crate::poller::{ConfigurationPoller, MembershipTarget};
use arc_swap::ArcSwapOption;
use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub use binary::{BinaryNodeFactory, BinaryTransport};
use timer::ResurrectionTimer;

const FAILURE_CHANNEL_CAPACITY: usize = 64;

/// How the pool turns endpoints into nodes
#[derive(Clone)]
pub enum Transport {
    /// Plain node factory, used with the text protocol
    Text(Arc<dyn NodeFactory>),
    /// Binary transport; every node shares the configured authenticator
    Binary(Arc<dyn BinaryTransport>),
}

impl Transport {
    fn into_factory(self, config: &ClusterConfig) -> Result<Arc<dyn NodeFactory>> {
        match (self, config.protocol) {
            (Transport::Text(factory), Protocol::Text) => Ok(factory),
            (Transport::Binary(transport), Protocol::Binary) => {
                Ok(Arc::new(BinaryNodeFactory::new(config, transport)?))
            }
            (transport, protocol) => Err(ClusterError::InvalidConfig(format!(
                "a {} transport cannot serve the {} protocol",
                transport.name(),
                protocol
            ))),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Transport::Text(_) => "text",
            Transport::Binary(_) => "binary",
        }
    }
}

/// Snapshot of pool health
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total_nodes: usize,
    pub working_nodes: usize,
    pub dead_nodes: usize,
    pub timer_armed: bool,
    pub disposed: bool,
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Pool Stats: {}/{} working, {} dead, recovery timer {}{}",
            self.working_nodes,
            self.total_nodes,
            self.dead_nodes,
            if self.timer_armed { "armed" } else { "idle" },
            if self.disposed { ", disposed" } else { "" }
        )
    }
}

/// Builds a [`ServerPool`]
pub struct ServerPoolBuilder {
    config: ClusterConfig,
    node_factory: Option<Arc<dyn NodeFactory>>,
    locator_factory: Option<Arc<dyn LocatorFactory>>,
    discovery: Option<(Arc<dyn DiscoveryClient>, Option<ClusterVersion>)>,
}

impl ServerPoolBuilder {
    pub fn new(config: &ClusterConfig) -> Self {
        Self {
            config: config.clone(),
            node_factory: None,
            locator_factory: None,
            discovery: None,
        }
    }

    /// Use `factory` for every node, whatever the configured protocol
    pub fn node_factory(mut self, factory: Arc<dyn NodeFactory>) -> Self {
        self.node_factory = Some(factory);
        self
    }

    /// Pick the node factory from `transport`, checking it matches the configured protocol
    pub fn transport(mut self, transport: Transport) -> Result<Self> {
        self.node_factory = Some(transport.into_factory(&self.config)?);
        Ok(self)
    }

    /// Override the locator strategy from the configuration
    pub fn locator_factory(mut self, factory: Arc<dyn LocatorFactory>) -> Self {
        self.locator_factory = Some(factory);
        self
    }

    /// Poll `discovery` for topology changes once the pool starts.
    ///
    /// `known_version` is the version the start endpoints were read at, if any.
    pub fn discovery(
        mut self,
        discovery: Arc<dyn DiscoveryClient>,
        known_version: Option<ClusterVersion>,
    ) -> Self {
        self.discovery = Some((discovery, known_version));
        self
    }

    pub fn build(self) -> Result<ServerPool> {
        self.config.validate()?;
        let node_factory = self.node_factory.ok_or_else(|| {
            ClusterError::InvalidConfig("server pool needs a node factory".to_string())
        })?;
        let locator_factory = self
            .locator_factory
            .unwrap_or_else(|| Arc::new(self.config.locator) as Arc<dyn LocatorFactory>);
        let poll_interval = self.config.effective_poll_interval();
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);

        let shared = Arc::new_cyclic(|me| PoolShared {
            me: me.clone(),
            node_factory,
            locator_factory,
            poll_interval,
            locator: ArcSwapOption::from(None),
            failures,
            state: Mutex::new(PoolState {
                nodes: Vec::new(),
                failed: Vec::new(),
                started: false,
                disposed: false,
                timer: ResurrectionTimer::new(self.config.dead_timeout),
                discovery: self.discovery,
                poller: None,
            }),
        });
        Ok(ServerPool { shared })
    }
}

/// Published routing table
struct ActiveLocator(Box<dyn NodeLocator>);

struct PoolState {
    nodes: Vec<Arc<dyn Node>>,
    // Reported failed and not yet answered a ping
    failed: Vec<Arc<dyn Node>>,
    started: bool,
    disposed: bool,
    timer: ResurrectionTimer,
    discovery: Option<(Arc<dyn DiscoveryClient>, Option<ClusterVersion>)>,
    poller: Option<ConfigurationPoller>,
}

impl PoolState {
    fn is_dead(&self, node: &Arc<dyn Node>) -> bool {
        !node.is_alive() || self.failed.iter().any(|f| same_node(f, node))
    }

    fn working(&self) -> Vec<Arc<dyn Node>> {
        self.nodes
            .iter()
            .filter(|n| !self.is_dead(n))
            .cloned()
            .collect()
    }

    fn dead(&self) -> Vec<Arc<dyn Node>> {
        self.nodes
            .iter()
            .filter(|n| self.is_dead(n))
            .cloned()
            .collect()
    }
}

struct PoolShared {
    me: Weak<PoolShared>,
    node_factory: Arc<dyn NodeFactory>,
    locator_factory: Arc<dyn LocatorFactory>,
    poll_interval: Duration,
    locator: ArcSwapOption<ActiveLocator>,
    failures: broadcast::Sender<Endpoint>,
    state: Mutex<PoolState>,
}

/// Membership of a cache cluster as seen by one client.
///
/// Routing reads (`locate`, `working_nodes`) go through an atomically swapped
/// locator and never take the pool lock. Everything that changes membership
/// (`start`, `update`, node failures, resurrection ticks, `dispose`) runs under a
/// single pool-wide lock, and every new locator is fully initialized before it is
/// published.
///
/// Cloning the handle shares the pool.
#[derive(Clone)]
pub struct ServerPool {
    shared: Arc<PoolShared>,
}

impl ServerPool {
    pub fn builder(config: &ClusterConfig) -> ServerPoolBuilder {
        ServerPoolBuilder::new(config)
    }

    /// Pool using `node_factory` and the configured locator
    pub fn new(config: &ClusterConfig, node_factory: Arc<dyn NodeFactory>) -> Result<Self> {
        Self::builder(config).node_factory(node_factory).build()
    }

    /// Pool for the binary protocol, with the configured authenticator shared by every node
    pub fn binary(config: &ClusterConfig, transport: Arc<dyn BinaryTransport>) -> Result<Self> {
        Self::builder(config)
            .transport(Transport::Binary(transport))?
            .build()
    }

    /// Creates one node per endpoint and publishes the first locator.
    ///
    /// Must be called from inside a tokio runtime; the recovery timer and the
    /// topology poller run on it.
    pub fn start(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        let runtime = Handle::try_current()?;
        self.shared.start(endpoints, runtime)
    }

    /// Node responsible for `key`, or `None` if no node is working or the pool is disposed
    pub fn locate(&self, key: &str) -> Option<Arc<dyn Node>> {
        let active = self.shared.locator.load();
        (*active).as_ref().and_then(|locator| locator.0.locate(key))
    }

    /// Nodes currently eligible for routing
    pub fn working_nodes(&self) -> Vec<Arc<dyn Node>> {
        self.shared.working_nodes()
    }

    /// Replaces membership with `endpoints`.
    ///
    /// Existing nodes that are dead keep their place and stay under the recovery
    /// timer; every other endpoint gets a fresh node. Nodes that leave the set are
    /// disposed.
    pub fn update(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        self.shared.apply_endpoints(endpoints)
    }

    /// Takes `node` out of routing and arms the recovery timer
    pub fn on_node_failure(&self, node: &Arc<dyn Node>) {
        self.shared.on_node_failure(node);
    }

    /// Pings every dead node once and republishes the locator if any came back
    pub async fn resurrection_check(&self) {
        self.shared.resurrection_check().await;
    }

    /// Stops the poller and the timer, then releases the locator and every node.
    ///
    /// Safe to call more than once and from several threads.
    pub fn dispose(&self) {
        self.shared.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.state.lock().disposed
    }

    /// Every node in the pool, working or dead
    pub fn nodes(&self) -> Vec<Arc<dyn Node>> {
        self.shared.state.lock().nodes.clone()
    }

    /// Endpoints of nodes reported as failed, in report order
    pub fn subscribe_failures(&self) -> broadcast::Receiver<Endpoint> {
        self.shared.failures.subscribe()
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        let dead_nodes = state.dead().len();
        PoolStats {
            total_nodes: state.nodes.len(),
            working_nodes: self.shared.working_nodes().len(),
            dead_nodes,
            timer_armed: state.timer.is_armed(),
            disposed: state.disposed,
        }
    }
}

impl MembershipTarget for ServerPool {
    fn working_node_count(&self) -> usize {
        self.shared.working_nodes().len()
    }

    fn update(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        self.shared.apply_endpoints(endpoints)
    }
}

impl fmt::Debug for ServerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerPool")
            .field("stats", &self.stats())
            .finish()
    }
}

impl PoolShared {
    fn start(&self, endpoints: Vec<Endpoint>, runtime: Handle) -> Result<()> {
        let mut state = self.state.lock();
        if state.disposed {
            return Err(ClusterError::PoolDisposed);
        }
        if state.started {
            return Err(ClusterError::AlreadyStarted);
        }

        let poller = match &state.discovery {
            Some((discovery, known_version)) => {
                let target: Weak<dyn MembershipTarget> = self.me.clone();
                let poller =
                    ConfigurationPoller::new(Arc::clone(discovery), target, self.poll_interval)?;
                if let Some(version) = known_version {
                    poller.seed_version(version.clone());
                }
                Some(poller)
            }
            None => None,
        };

        let mut seen = HashSet::new();
        let mut nodes = Vec::with_capacity(endpoints.len());
        for endpoint in endpoints {
            if !seen.insert(endpoint.clone()) {
                continue;
            }
            match self.create_node(&endpoint) {
                Ok(node) => nodes.push(node),
                Err(err) => warn!(%endpoint, error = %err, "could not create node, skipping"),
            }
        }

        self.publish(nodes.clone());
        state.nodes = nodes;
        state.started = true;
        state.timer.bind(runtime.clone());

        state.discovery = None;
        if let Some(poller) = poller {
            poller.start(&runtime);
            state.poller = Some(poller);
        }

        info!(nodes = state.nodes.len(), "server pool started");
        Ok(())
    }

    fn apply_endpoints(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        let released = {
            let mut state = self.state.lock();
            if state.disposed {
                warn!("update called on a disposed pool");
                return Err(ClusterError::PoolDisposed);
            }
            if !state.started {
                return Err(ClusterError::NotStarted);
            }

            let dead: HashMap<&Endpoint, &Arc<dyn Node>> = state
                .nodes
                .iter()
                .filter(|node| state.is_dead(node))
                .map(|node| (node.endpoint(), node))
                .collect();

            let mut seen = HashSet::new();
            let mut fresh = Vec::with_capacity(endpoints.len());
            let mut retained = Vec::new();
            for endpoint in endpoints {
                if !seen.insert(endpoint.clone()) {
                    continue;
                }
                if let Some(node) = dead.get(&endpoint) {
                    debug!(%endpoint, "keeping dead node");
                    retained.push(Arc::clone(*node));
                    continue;
                }
                match self.create_node(&endpoint) {
                    Ok(node) => fresh.push(node),
                    Err(err) => warn!(%endpoint, error = %err, "could not create node, skipping"),
                }
            }

            self.publish(fresh.clone());

            let still_dead = retained.len();
            let mut next = fresh;
            next.extend(retained);
            let previous = std::mem::replace(&mut state.nodes, next);
            let PoolState { nodes, failed, .. } = &mut *state;
            failed.retain(|f| nodes.iter().any(|n| same_node(n, f)));

            if still_dead > 0 {
                if !state.timer.is_armed() {
                    self.arm_timer(&mut state.timer);
                }
            } else {
                state.timer.cancel();
            }

            info!(nodes = state.nodes.len(), dead = still_dead, "server pool updated");

            previous
                .into_iter()
                .filter(|old| !state.nodes.iter().any(|kept| same_node(kept, old)))
                .collect::<Vec<_>>()
        };

        for node in released {
            debug!(endpoint = %node.endpoint(), "releasing node");
            node.dispose();
        }
        Ok(())
    }

    fn on_node_failure(&self, node: &Arc<dyn Node>) {
        let mut state = self.state.lock();
        if state.disposed {
            warn!(endpoint = %node.endpoint(), "node failure reported to a disposed pool");
            return;
        }
        if !state.nodes.iter().any(|n| same_node(n, node)) {
            debug!(endpoint = %node.endpoint(), "ignoring failure of a node that left the pool");
            return;
        }

        warn!(endpoint = %node.endpoint(), "node is dead");
        if !state.failed.iter().any(|f| same_node(f, node)) {
            state.failed.push(Arc::clone(node));
        }
        self.publish(state.working());

        if !state.timer.is_armed() {
            debug!(delay = ?state.timer.delay(), "starting the recovery timer");
            self.arm_timer(&mut state.timer);
        }
        drop(state);

        let _ = self.failures.send(node.endpoint().clone());
    }

    async fn resurrection_check(&self) {
        let dead: Vec<Arc<dyn Node>> = {
            let state = self.state.lock();
            if state.disposed {
                return;
            }
            state.dead()
        };

        let mut revived = Vec::new();
        for node in &dead {
            if node.ping().await {
                info!(endpoint = %node.endpoint(), "node is back");
                revived.push(Arc::clone(node));
            } else {
                debug!(endpoint = %node.endpoint(), "node is still dead");
            }
        }

        let mut state = self.state.lock();
        if state.disposed {
            return;
        }

        if !revived.is_empty() {
            state
                .failed
                .retain(|f| !revived.iter().any(|r| same_node(r, f)));
            self.publish(state.working());
        }

        let remaining = state.dead().len();
        if remaining == 0 {
            debug!("all nodes are alive, stopping the recovery timer");
            state.timer.disarm();
        } else {
            debug!(remaining, "rescheduling the recovery timer");
            self.arm_timer(&mut state.timer);
        }
    }

    fn dispose(&self) {
        let (nodes, poller) = {
            let mut state = self.state.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.timer.shutdown();
            state.failed.clear();
            state.discovery = None;
            (std::mem::take(&mut state.nodes), state.poller.take())
        };

        if let Some(poller) = poller {
            poller.stop();
        }
        if let Some(active) = self.locator.swap(None) {
            active.0.release();
        }
        for node in &nodes {
            node.dispose();
        }
        info!(nodes = nodes.len(), "server pool disposed");
    }

    fn working_nodes(&self) -> Vec<Arc<dyn Node>> {
        let active = self.locator.load();
        (*active)
            .as_ref()
            .map(|locator| locator.0.working_nodes())
            .unwrap_or_default()
    }

    fn create_node(&self, endpoint: &Endpoint) -> Result<Arc<dyn Node>> {
        let sink: Weak<dyn FailureSink> = self.me.clone();
        self.node_factory
            .create_node(endpoint, FailureNotifier::new(sink))
    }

    /// Builds a locator over `nodes` and swaps it in. Callers hold the pool lock.
    fn publish(&self, nodes: Vec<Arc<dyn Node>>) {
        let mut locator = self.locator_factory.create();
        locator.initialize(nodes);
        self.locator.store(Some(Arc::new(ActiveLocator(locator))));
    }

    fn arm_timer(&self, timer: &mut ResurrectionTimer) {
        let me = self.me.clone();
        let armed = timer.arm(move |generation| {
            async move {
                if let Some(shared) = me.upgrade() {
                    shared.timer_tick(generation).await;
                }
            }
            .boxed()
        });
        if !armed {
            warn!("no runtime bound, dead nodes will not be probed");
        }
    }

    async fn timer_tick(&self, generation: u64) {
        let current = self.state.lock().timer.is_current(generation);
        if current {
            self.resurrection_check().await;
        }
    }
}

impl FailureSink for PoolShared {
    fn node_failed(&self, node: &Arc<dyn Node>) {
        self.on_node_failure(node);
    }
}

impl MembershipTarget for PoolShared {
    fn working_node_count(&self) -> usize {
        self.working_nodes().len()
    }

    fn update(&self, endpoints: Vec<Endpoint>) -> Result<()> {
        self.apply_endpoints(endpoints)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{SimulatedNode, SimulatedNodeFactory};

    fn ep(s: &str) -> Endpoint {
        s.parse().unwrap()
    }

    fn pool_with(factory: &Arc<SimulatedNodeFactory>) -> ServerPool {
        let config = ClusterConfig::new().dead_timeout(Duration::from_secs(1));
        ServerPool::new(&config, factory.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_start_publishes_all_nodes() {
        let factory = Arc::new(SimulatedNodeFactory::new());
        let pool = pool_with(&factory);
        assert!(pool.locate("k").is_none());

        pool.start(vec![ep("a:1"), ep("b:1"), ep("a:1")]).unwrap();
        assert_eq!(pool.working_nodes().len(), 2);
        assert!(pool.locate("k").is_some());
        assert_eq!(factory.created_count(), 2);
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let factory = Arc::new(SimulatedNodeFactory::new());
        let pool = pool_with(&factory);
        pool.start(vec![ep("a:1")]).unwrap();
        assert_eq!(pool.start(vec![ep("a:1")]), Err(ClusterError::AlreadyStarted));
    }

    #[test]
    fn test_start_outside_runtime() {
        let factory = Arc::new(SimulatedNodeFactory::new());
        let pool = pool_with(&factory);
        let err = pool.start(vec![ep("a:1")]).unwrap_err();
        assert!(matches!(err, ClusterError::RuntimeUnavailable(_)));
    }

    #[tokio::test]
    async fn test_update_before_start() {
        let factory = Arc::new(SimulatedNodeFactory::new());
        let pool = pool_with(&factory);
        assert_eq!(pool.update(vec![ep("a:1")]), Err(ClusterError::NotStarted));
    }

    #[tokio::test]
    async fn test_failure_removes_node_from_routing() {
        let factory = Arc::new(SimulatedNodeFactory::new());
        let pool = pool_with(&factory);
        let mut failures = pool.subscribe_failures();
        pool.start(vec![ep("a:1"), ep("b:1")]).unwrap();

        factory.latest(&ep("a:1")).unwrap().fail();

        let working = pool.working_nodes();
        assert_eq!(working.len(), 1);
        assert_eq!(working[0].endpoint(), &ep("b:1"));
        assert!(pool.stats().timer_armed);
        assert_eq!(failures.recv().await.unwrap(), ep("a:1"));
    }

    #[tokio::test]
    async fn test_stale_failure_is_ignored() {
        let factory = Arc::new(SimulatedNodeFactory::new());
        let pool = pool_with(&factory);
        pool.start(vec![ep("a:1")]).unwrap();

        let outsider = SimulatedNode::new(ep("a:1"), FailureNotifier::detached());
        pool.on_node_failure(&outsider.as_node());

        assert_eq!(pool.working_nodes().len(), 1);
        assert!(!pool.stats().timer_armed);
    }

    #[tokio::test]
    async fn test_dispose_is_idempotent() {
        let factory = Arc::new(SimulatedNodeFactory::new());
        let pool = pool_with(&factory);
        pool.start(vec![ep("a:1"), ep("b:1")]).unwrap();

        pool.dispose();
        pool.dispose();

        assert!(pool.is_disposed());
        assert!(pool.locate("k").is_none());
        assert!(pool.working_nodes().is_empty());
        assert!(factory.created().iter().all(|n| n.dispose_count() == 1));
        assert_eq!(pool.update(vec![ep("c:1")]), Err(ClusterError::PoolDisposed));
    }

    #[tokio::test]
    async fn test_transport_must_match_protocol() {
        let factory = Arc::new(SimulatedNodeFactory::new());
        let config = ClusterConfig::new();
        let err = ServerPool::builder(&config)
            .transport(Transport::Text(factory))
            .err()
            .unwrap();
        assert!(matches!(err, ClusterError::InvalidConfig(_)));
    }

    #[test]
    fn test_stats_display() {
        let stats = PoolStats {
            total_nodes: 3,
            working_nodes: 2,
            dead_nodes: 1,
            timer_armed: true,
            disposed: false,
        };
        assert_eq!(
            stats.to_string(),
            "Pool Stats: 2/3 working, 1 dead, recovery timer armed"
        );
    }
}
