use super::{ClusterVersion, DiscoveryClient, Topology};
use crate::core::{ClusterError, Endpoint, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

/// In-memory discovery source driven by the caller.
///
/// Holds one topology that tests (and the demo CLI) replace at will. Setting it
/// unreachable makes every read fail until [`ScriptedDiscovery::reresolve`] is
/// called with healing enabled, which models a configuration endpoint that moved.
pub struct ScriptedDiscovery {
    state: Mutex<ScriptState>,
}

struct ScriptState {
    topology: Topology,
    reachable: bool,
    reresolve_heals: bool,
    reads: usize,
    reresolves: usize,
}

impl ScriptedDiscovery {
    pub fn new(version: impl Into<ClusterVersion>, endpoints: Vec<Endpoint>) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                topology: Topology {
                    version: version.into(),
                    endpoints,
                },
                reachable: true,
                reresolve_heals: false,
                reads: 0,
                reresolves: 0,
            }),
        }
    }

    /// Publishes a new topology
    pub fn set_topology(&self, version: impl Into<ClusterVersion>, endpoints: Vec<Endpoint>) {
        self.state.lock().topology = Topology {
            version: version.into(),
            endpoints,
        };
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.lock().reachable = reachable;
    }

    /// Whether the next `reresolve` restores reachability
    pub fn set_reresolve_heals(&self, heals: bool) {
        self.state.lock().reresolve_heals = heals;
    }

    /// Number of endpoint reads, failed ones included
    pub fn read_count(&self) -> usize {
        self.state.lock().reads
    }

    pub fn reresolve_count(&self) -> usize {
        self.state.lock().reresolves
    }
}

#[async_trait]
impl DiscoveryClient for ScriptedDiscovery {
    async fn current_version(&self) -> Result<ClusterVersion> {
        let state = self.state.lock();
        if !state.reachable {
            return Err(ClusterError::DiscoveryUnreachable(
                "configuration endpoint is not answering".to_string(),
            ));
        }
        Ok(state.topology.version.clone())
    }

    async fn current_endpoints(&self) -> Result<Vec<Endpoint>> {
        let mut state = self.state.lock();
        state.reads += 1;
        if !state.reachable {
            return Err(ClusterError::DiscoveryUnreachable(
                "configuration endpoint is not answering".to_string(),
            ));
        }
        Ok(state.topology.endpoints.clone())
    }

    async fn reresolve(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.reresolves += 1;
        if state.reresolve_heals {
            state.reachable = true;
            Ok(())
        } else {
            Err(ClusterError::DiscoveryUnreachable(
                "re-resolving the configuration endpoint failed".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_topology_reads_version_and_endpoints() {
        let discovery = ScriptedDiscovery::new(1u64, vec!["a:1".parse().unwrap()]);
        let topology = discovery.topology().await.unwrap();
        assert_eq!(topology.version, ClusterVersion::from(1u64));
        assert_eq!(topology.endpoints.len(), 1);
        assert_eq!(discovery.read_count(), 1);
    }

    #[tokio::test]
    async fn test_outage_and_healing_reresolve() {
        let discovery = ScriptedDiscovery::new("v1", vec![]);
        discovery.set_reachable(false);
        assert!(discovery.topology().await.is_err());
        assert!(discovery.reresolve().await.is_err());
        assert!(discovery.topology().await.is_err());

        discovery.set_reresolve_heals(true);
        discovery.reresolve().await.unwrap();
        assert!(discovery.topology().await.is_ok());
        assert_eq!(discovery.reresolve_count(), 2);
    }
}
