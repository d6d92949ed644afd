use crate::core::{ClusterError, Result};
use lazy_static::lazy_static;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Authentication settings for the binary protocol
///
/// `parameters` is handed to the provider untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// SASL mechanism name, e.g. `PLAIN`
    pub mechanism: String,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl AuthConfig {
    pub fn new(mechanism: &str) -> Self {
        Self {
            mechanism: mechanism.to_string(),
            parameters: HashMap::new(),
        }
    }

    /// Set a provider parameter
    pub fn parameter(mut self, key: &str, value: &str) -> Self {
        self.parameters.insert(key.to_string(), value.to_string());
        self
    }

    /// Shorthand for SASL PLAIN credentials
    pub fn plain(username: &str, password: &str) -> Self {
        Self::new(PlainTextAuthenticator::MECHANISM)
            .parameter("userName", username)
            .parameter("password", password)
    }
}

/// SASL handshake provider
///
/// One instance is shared by every node of a pool, so implementations must be
/// safe to use from many transports at once.
pub trait AuthenticationProvider: Send + Sync {
    /// Mechanism name sent to the server
    fn mechanism(&self) -> &str;

    /// Configures the provider. Called exactly once, before any node uses it.
    fn initialize(&mut self, parameters: &HashMap<String, String>) -> Result<()>;

    /// Initial client response for the SASL exchange
    fn initial_response(&self) -> Vec<u8>;
}

impl fmt::Debug for dyn AuthenticationProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationProvider")
            .field("mechanism", &self.mechanism())
            .finish()
    }
}

/// SASL `PLAIN` (RFC 4616)
#[derive(Default)]
pub struct PlainTextAuthenticator {
    response: Vec<u8>,
}

impl PlainTextAuthenticator {
    pub const MECHANISM: &'static str = "PLAIN";
}

impl AuthenticationProvider for PlainTextAuthenticator {
    fn mechanism(&self) -> &str {
        Self::MECHANISM
    }

    fn initialize(&mut self, parameters: &HashMap<String, String>) -> Result<()> {
        let zone = parameters.get("zone").map(String::as_str).unwrap_or("");
        let username = parameters
            .get("userName")
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                ClusterError::AuthenticationError("PLAIN requires a 'userName' parameter".into())
            })?;
        let password = parameters.get("password").ok_or_else(|| {
            ClusterError::AuthenticationError("PLAIN requires a 'password' parameter".into())
        })?;

        let mut response = Vec::with_capacity(zone.len() + username.len() + password.len() + 2);
        response.extend_from_slice(zone.as_bytes());
        response.push(0);
        response.extend_from_slice(username.as_bytes());
        response.push(0);
        response.extend_from_slice(password.as_bytes());
        self.response = response;
        Ok(())
    }

    fn initial_response(&self) -> Vec<u8> {
        self.response.clone()
    }
}

type ProviderConstructor = Arc<dyn Fn() -> Box<dyn AuthenticationProvider> + Send + Sync>;

/// Maps mechanism names to provider constructors
pub struct AuthRegistry {
    constructors: RwLock<HashMap<String, ProviderConstructor>>,
}

// Global registry, pre-populated with the built-in mechanisms
lazy_static! {
    static ref GLOBAL_AUTH_REGISTRY: AuthRegistry = AuthRegistry::new();
}

impl AuthRegistry {
    /// Get the process-wide registry
    pub fn global() -> &'static AuthRegistry {
        &GLOBAL_AUTH_REGISTRY
    }

    /// Creates a registry with the built-in mechanisms
    pub fn new() -> Self {
        let registry = Self {
            constructors: RwLock::new(HashMap::new()),
        };
        registry.register(PlainTextAuthenticator::MECHANISM, || {
            Box::new(PlainTextAuthenticator::default())
        });
        registry
    }

    /// Registers (or replaces) a mechanism
    pub fn register<F>(&self, mechanism: &str, constructor: F)
    where
        F: Fn() -> Box<dyn AuthenticationProvider> + Send + Sync + 'static,
    {
        self.constructors
            .write()
            .insert(mechanism.to_ascii_uppercase(), Arc::new(constructor));
    }

    pub fn contains(&self, mechanism: &str) -> bool {
        self.constructors
            .read()
            .contains_key(&mechanism.to_ascii_uppercase())
    }

    /// Builds and initializes the provider described by `config`
    pub fn resolve(&self, config: &AuthConfig) -> Result<Arc<dyn AuthenticationProvider>> {
        let constructor = self
            .constructors
            .read()
            .get(&config.mechanism.to_ascii_uppercase())
            .cloned()
            .ok_or_else(|| {
                ClusterError::InvalidConfig(format!(
                    "unknown authentication mechanism '{}'",
                    config.mechanism
                ))
            })?;

        let mut provider = constructor();
        provider.initialize(&config.parameters)?;
        Ok(Arc::from(provider))
    }
}

impl Default for AuthRegistry {
    fn default() -> Self {
        Self::new()
    }
}
