use crate::config::ClusterConfig;
use crate::core::{ClusterError, Endpoint, Result};
use crate::discovery::{ClusterVersion, DiscoveryClient, Topology};
use crate::node::Node;
use crate::pool::{PoolStats, ServerPool, Transport};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Cluster-aware entry point.
///
/// Reads the initial topology, starts a [`ServerPool`] over it and keeps it
/// current with a configuration poller when a discovery client is given.
pub struct ClusterClient {
    config: ClusterConfig,
    pool: ServerPool,
}

impl ClusterClient {
    /// Connect to the cluster.
    ///
    /// With `discovery`, the start membership comes from the discovery source,
    /// retried once after re-resolving; if it stays unreachable the configured
    /// seed servers are used and the poller takes over from there. Without
    /// `discovery`, the seed servers are the whole membership.
    pub async fn connect(
        config: ClusterConfig,
        transport: Transport,
        discovery: Option<Arc<dyn DiscoveryClient>>,
    ) -> Result<Self> {
        config.validate()?;
        if discovery.is_none() && config.servers.is_empty() {
            return Err(ClusterError::InvalidConfig(
                "no discovery client and no servers configured".to_string(),
            ));
        }

        let mut builder = ServerPool::builder(&config).transport(transport)?;
        let endpoints = match discovery {
            Some(discovery) => {
                let (endpoints, version) = initial_topology(discovery.as_ref(), &config).await;
                builder = builder.discovery(discovery, version);
                endpoints
            }
            None => config.servers.clone(),
        };

        let pool = builder.build()?;
        pool.start(endpoints)?;
        info!(protocol = %config.protocol, locator = %config.locator, "cluster client connected");
        Ok(Self { config, pool })
    }

    /// Node responsible for `key`
    pub fn locate(&self, key: &str) -> Option<Arc<dyn Node>> {
        self.pool.locate(key)
    }

    pub fn working_nodes(&self) -> Vec<Arc<dyn Node>> {
        self.pool.working_nodes()
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Endpoints of nodes as they fail
    pub fn subscribe_failures(&self) -> broadcast::Receiver<Endpoint> {
        self.pool.subscribe_failures()
    }

    pub fn pool(&self) -> &ServerPool {
        &self.pool
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Shuts the client down. Safe to call more than once.
    pub fn dispose(&self) {
        self.pool.dispose();
    }
}

impl Drop for ClusterClient {
    fn drop(&mut self) {
        self.pool.dispose();
    }
}

async fn initial_topology(
    discovery: &dyn DiscoveryClient,
    config: &ClusterConfig,
) -> (Vec<Endpoint>, Option<ClusterVersion>) {
    let first = discovery.topology().await;
    let topology = match first {
        Ok(topology) => Ok(topology),
        Err(err) => {
            warn!(error = %err, "could not read the cluster configuration, re-resolving");
            reread(discovery).await
        }
    };

    match topology {
        Ok(Topology { version, endpoints }) => {
            info!(%version, endpoints = endpoints.len(), "read cluster configuration");
            (endpoints, Some(version))
        }
        Err(err) => {
            warn!(
                error = %err,
                servers = config.servers.len(),
                "discovery unreachable, starting from the configured servers"
            );
            (config.servers.clone(), None)
        }
    }
}

async fn reread(discovery: &dyn DiscoveryClient) -> Result<Topology> {
    discovery.reresolve().await?;
    discovery.topology().await
}
