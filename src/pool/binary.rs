use crate::auth::{AuthRegistry, AuthenticationProvider};
use crate::config::ClusterConfig;
use crate::core::{Endpoint, Result};
use crate::node::{FailureNotifier, Node, NodeFactory};
use std::sync::Arc;
use tracing::debug;

/// Opens binary-protocol connections.
///
/// `authenticator` is the pool-wide SASL provider; the same instance is passed
/// for every endpoint.
pub trait BinaryTransport: Send + Sync {
    fn connect(
        &self,
        endpoint: &Endpoint,
        authenticator: Option<Arc<dyn AuthenticationProvider>>,
        failures: FailureNotifier,
    ) -> Result<Arc<dyn Node>>;
}

/// Node factory for the binary protocol
///
/// The authentication provider is resolved once from the configuration and
/// then attached to every node the factory creates.
pub struct BinaryNodeFactory {
    transport: Arc<dyn BinaryTransport>,
    authenticator: Option<Arc<dyn AuthenticationProvider>>,
}

impl BinaryNodeFactory {
    pub fn new(config: &ClusterConfig, transport: Arc<dyn BinaryTransport>) -> Result<Self> {
        let authenticator = match &config.authentication {
            Some(auth) => {
                let provider = AuthRegistry::global().resolve(auth)?;
                debug!(mechanism = provider.mechanism(), "authentication provider ready");
                Some(provider)
            }
            None => None,
        };
        Ok(Self {
            transport,
            authenticator,
        })
    }

    /// Provider shared by every node of this factory
    pub fn authenticator(&self) -> Option<&Arc<dyn AuthenticationProvider>> {
        self.authenticator.as_ref()
    }
}

impl NodeFactory for BinaryNodeFactory {
    fn create_node(&self, endpoint: &Endpoint, failures: FailureNotifier) -> Result<Arc<dyn Node>> {
        self.transport
            .connect(endpoint, self.authenticator.clone(), failures)
    }
}
