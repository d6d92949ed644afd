pub mod scripted;

use crate::core::{Endpoint, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use scripted::ScriptedDiscovery;

/// Opaque token identifying one revision of the cluster configuration.
///
/// Only compared for equality; two different tokens mean the membership may
/// have changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterVersion(String);

impl ClusterVersion {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<u64> for ClusterVersion {
    fn from(version: u64) -> Self {
        Self(version.to_string())
    }
}

impl From<&str> for ClusterVersion {
    fn from(token: &str) -> Self {
        Self(token.to_string())
    }
}

impl fmt::Display for ClusterVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Cluster membership read at one version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub version: ClusterVersion,
    pub endpoints: Vec<Endpoint>,
}

/// Source of cluster membership.
///
/// Implementations talk to whatever serves the cluster configuration. Any
/// method may fail with [`ClusterError::DiscoveryUnreachable`](crate::ClusterError::DiscoveryUnreachable).
#[async_trait]
pub trait DiscoveryClient: Send + Sync {
    /// Current configuration version
    async fn current_version(&self) -> Result<ClusterVersion>;

    /// Current cache node endpoints
    async fn current_endpoints(&self) -> Result<Vec<Endpoint>>;

    /// Re-resolves the discovery endpoint itself, e.g. after a DNS change
    async fn reresolve(&self) -> Result<()>;

    /// Reads endpoints and version together
    async fn topology(&self) -> Result<Topology> {
        let endpoints = self.current_endpoints().await?;
        let version = self.current_version().await?;
        Ok(Topology { version, endpoints })
    }
}
