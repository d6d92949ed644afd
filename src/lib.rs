// ============================================================================
// memcluster: client-side cluster membership for distributed caches
// ============================================================================

pub mod auth;
pub mod client;
pub mod config;
pub mod core;
pub mod discovery;
pub mod locator;
pub mod node;
pub mod poller;
pub mod pool;
pub mod prelude;

// Re-export main types for convenience
pub use core::{ClusterError, Endpoint, Result};
pub use config::{ClusterConfig, DEFAULT_DEAD_TIMEOUT, DEFAULT_POLL_INTERVAL, Protocol};

// Membership
pub use client::ClusterClient;
pub use pool::{
    BinaryNodeFactory, BinaryTransport, PoolStats, ServerPool, ServerPoolBuilder, Transport,
};
pub use poller::{ConfigurationPoller, MembershipTarget, PollOutcome};
pub use discovery::{ClusterVersion, DiscoveryClient, ScriptedDiscovery, Topology};

// Nodes and routing
pub use node::{FailureNotifier, Node, NodeFactory, SimulatedNode, SimulatedNodeFactory};
pub use locator::{
    KetamaLocator, LocatorFactory, LocatorKind, ModuloLocator, NodeLocator, SingleNodeLocator,
};

// Authentication
pub use auth::{AuthConfig, AuthRegistry, AuthenticationProvider, PlainTextAuthenticator};
