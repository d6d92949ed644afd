use crate::auth::{AuthConfig, AuthRegistry};
use crate::core::{ClusterError, Endpoint, Result};
use crate::locator::LocatorKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Poll once every minute unless told otherwise.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(60_000);

/// How long a dead node waits before it is pinged again.
pub const DEFAULT_DEAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Wire protocol spoken to the cache nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Text,
    #[default]
    Binary,
}

impl FromStr for Protocol {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(Protocol::Text),
            "binary" => Ok(Protocol::Binary),
            other => Err(ClusterError::InvalidConfig(format!(
                "unknown protocol '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Text => f.write_str("text"),
            Protocol::Binary => f.write_str("binary"),
        }
    }
}

/// Cluster client configuration
///
/// Built with the setter chain or parsed from a `memcluster://` URL or JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Address of the discovery endpoint, if topology is discovered
    pub cluster_endpoint: Option<Endpoint>,

    /// Static seed servers, used when discovery is unavailable at startup
    pub servers: Vec<Endpoint>,

    /// Delay before dead nodes are probed again
    pub dead_timeout: Duration,

    /// Topology poll interval; `None` means [`DEFAULT_POLL_INTERVAL`]
    pub poll_interval: Option<Duration>,

    pub protocol: Protocol,

    pub locator: LocatorKind,

    pub authentication: Option<AuthConfig>,
}

impl ClusterConfig {
    /// Create a configuration with defaults and no endpoints
    pub fn new() -> Self {
        Self {
            cluster_endpoint: None,
            servers: Vec::new(),
            dead_timeout: DEFAULT_DEAD_TIMEOUT,
            poll_interval: None,
            protocol: Protocol::default(),
            locator: LocatorKind::default(),
            authentication: None,
        }
    }

    /// Set the discovery endpoint
    pub fn cluster_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.cluster_endpoint = Some(endpoint);
        self
    }

    /// Add a static server
    pub fn server(mut self, endpoint: Endpoint) -> Self {
        self.servers.push(endpoint);
        self
    }

    /// Replace the static server list
    pub fn servers(mut self, endpoints: Vec<Endpoint>) -> Self {
        self.servers = endpoints;
        self
    }

    /// Set the dead node timeout
    pub fn dead_timeout(mut self, timeout: Duration) -> Self {
        self.dead_timeout = timeout;
        self
    }

    /// Set the poll interval
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = Some(interval);
        self
    }

    /// Set the poll interval in milliseconds; negative values select the default
    pub fn poll_interval_ms(mut self, interval_ms: i64) -> Self {
        self.poll_interval = u64::try_from(interval_ms).ok().map(Duration::from_millis);
        self
    }

    pub fn protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn locator(mut self, locator: LocatorKind) -> Self {
        self.locator = locator;
        self
    }

    pub fn authentication(mut self, auth: AuthConfig) -> Self {
        self.authentication = Some(auth);
        self
    }

    /// Poll interval actually used by the poller
    pub fn effective_poll_interval(&self) -> Duration {
        self.poll_interval.unwrap_or(DEFAULT_POLL_INTERVAL)
    }

    /// Parse from connection string
    ///
    /// Format: `memcluster://host:port?dead_timeout_ms=..&poll_interval_ms=..&protocol=..&locator=..&servers=h:p,h:p`
    ///
    /// # Examples
    ///
    /// ```
    /// # use memcluster::ClusterConfig;
    /// let config = ClusterConfig::from_url(
    ///     "memcluster://cache.cfg.local:11211?poll_interval_ms=5000&locator=modulo"
    /// ).unwrap();
    /// assert_eq!(config.effective_poll_interval().as_millis(), 5000);
    /// ```
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url.strip_prefix("memcluster://").ok_or_else(|| {
            ClusterError::InvalidConfig("URL must start with 'memcluster://'".to_string())
        })?;

        let (address, query) = match rest.split_once('?') {
            Some((address, query)) => (address, Some(query)),
            None => (rest, None),
        };

        let mut config = Self::new();
        let address = address.trim_end_matches('/');
        if !address.is_empty() {
            config.cluster_endpoint = Some(address.parse()?);
        }

        for pair in query.unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ClusterError::InvalidConfig(format!("malformed URL parameter '{}'", pair))
            })?;
            match key {
                "dead_timeout_ms" => {
                    let ms: u64 = value.parse().map_err(|_| {
                        ClusterError::InvalidConfig(format!("invalid dead_timeout_ms '{}'", value))
                    })?;
                    config.dead_timeout = Duration::from_millis(ms);
                }
                "poll_interval_ms" => {
                    let ms: i64 = value.parse().map_err(|_| {
                        ClusterError::InvalidConfig(format!("invalid poll_interval_ms '{}'", value))
                    })?;
                    config = config.poll_interval_ms(ms);
                }
                "protocol" => config.protocol = value.parse()?,
                "locator" => config.locator = value.parse()?,
                "servers" => config.servers = Endpoint::parse_list(value)?,
                other => {
                    return Err(ClusterError::InvalidConfig(format!(
                        "unknown URL parameter '{}'",
                        other
                    )));
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Convert to connection string. Credentials are never included.
    pub fn to_url(&self) -> String {
        let mut url = format!(
            "memcluster://{}?dead_timeout_ms={}&protocol={}&locator={}",
            self.cluster_endpoint
                .as_ref()
                .map(Endpoint::to_string)
                .unwrap_or_default(),
            self.dead_timeout.as_millis(),
            self.protocol,
            self.locator
        );
        if let Some(interval) = self.poll_interval {
            url.push_str(&format!("&poll_interval_ms={}", interval.as_millis()));
        }
        if !self.servers.is_empty() {
            let servers: Vec<String> = self.servers.iter().map(Endpoint::to_string).collect();
            url.push_str(&format!("&servers={}", servers.join(",")));
        }
        url
    }

    /// Parse from a JSON document
    pub fn from_json(json: &str) -> Result<Self> {
        let raw: RawClusterConfig = serde_json::from_str(json)?;
        let config = raw.into_config();
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.dead_timeout.is_zero() {
            return Err(ClusterError::InvalidConfig(
                "dead_timeout must be > 0".to_string(),
            ));
        }

        if let Some(interval) = self.poll_interval {
            if interval.is_zero() {
                return Err(ClusterError::InvalidConfig(
                    "poll_interval must be > 0".to_string(),
                ));
            }
        }

        if let Some(auth) = &self.authentication {
            if self.protocol != Protocol::Binary {
                return Err(ClusterError::InvalidConfig(
                    "authentication requires the binary protocol".to_string(),
                ));
            }
            if auth.mechanism.trim().is_empty() {
                return Err(ClusterError::InvalidConfig(
                    "authentication mechanism must not be empty".to_string(),
                ));
            }
            if !AuthRegistry::global().contains(&auth.mechanism) {
                return Err(ClusterError::InvalidConfig(format!(
                    "unknown authentication mechanism '{}'",
                    auth.mechanism
                )));
            }
        }

        Ok(())
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// On-disk shape of [`ClusterConfig`]
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawClusterConfig {
    #[serde(default)]
    cluster_endpoint: Option<Endpoint>,
    #[serde(default)]
    servers: Vec<Endpoint>,
    #[serde(default)]
    dead_timeout_ms: Option<u64>,
    #[serde(default)]
    poll_interval_ms: Option<i64>,
    #[serde(default)]
    protocol: Protocol,
    #[serde(default)]
    locator: LocatorKind,
    #[serde(default)]
    authentication: Option<AuthConfig>,
}

impl RawClusterConfig {
    fn into_config(self) -> ClusterConfig {
        let mut config = ClusterConfig::new()
            .servers(self.servers)
            .protocol(self.protocol)
            .locator(self.locator);
        config.cluster_endpoint = self.cluster_endpoint;
        if let Some(ms) = self.dead_timeout_ms {
            config.dead_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.poll_interval_ms {
            config = config.poll_interval_ms(ms);
        }
        config.authentication = self.authentication;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ClusterConfig::default();
        assert_eq!(config.dead_timeout, DEFAULT_DEAD_TIMEOUT);
        assert_eq!(config.effective_poll_interval(), Duration::from_millis(60_000));
        assert_eq!(config.protocol, Protocol::Binary);
        assert_eq!(config.locator, LocatorKind::Ketama);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_poll_interval_selects_default() {
        let config = ClusterConfig::new().poll_interval_ms(-1);
        assert_eq!(config.poll_interval, None);
        assert_eq!(config.effective_poll_interval(), DEFAULT_POLL_INTERVAL);

        let config = ClusterConfig::new().poll_interval_ms(250);
        assert_eq!(config.effective_poll_interval(), Duration::from_millis(250));
    }

    #[test]
    fn test_from_url() {
        let config = ClusterConfig::from_url(
            "memcluster://cache.cfg.local:11211?dead_timeout_ms=2000&poll_interval_ms=-1&protocol=text&locator=single&servers=a:1,b:2",
        )
        .unwrap();

        assert_eq!(config.cluster_endpoint.unwrap().to_string(), "cache.cfg.local:11211");
        assert_eq!(config.dead_timeout, Duration::from_secs(2));
        assert_eq!(config.poll_interval, None);
        assert_eq!(config.protocol, Protocol::Text);
        assert_eq!(config.locator, LocatorKind::Single);
        assert_eq!(config.servers.len(), 2);
    }

    #[test]
    fn test_invalid_url() {
        assert!(ClusterConfig::from_url("memcached://a:1").is_err());
        assert!(ClusterConfig::from_url("memcluster://a:0").is_err());
        assert!(ClusterConfig::from_url("memcluster://a:1?bogus=1").is_err());
        assert!(ClusterConfig::from_url("memcluster://a:1?dead_timeout_ms=0").is_err());
        assert!(ClusterConfig::from_url("memcluster://a:1?protocol=udp").is_err());
    }

    #[test]
    fn test_url_round_trip_keeps_settings() {
        let config = ClusterConfig::new()
            .cluster_endpoint("cfg:11211".parse().unwrap())
            .server("a:1".parse().unwrap())
            .poll_interval(Duration::from_millis(750))
            .locator(LocatorKind::Modulo);
        let parsed = ClusterConfig::from_url(&config.to_url()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_to_url_hides_credentials() {
        let config = ClusterConfig::new()
            .cluster_endpoint("cfg:11211".parse().unwrap())
            .authentication(AuthConfig::plain("alice", "secret123"));
        let url = config.to_url();
        assert!(!url.contains("secret123"));
        assert!(!url.contains("alice"));
    }

    #[test]
    fn test_validate_authentication() {
        let valid = ClusterConfig::new().authentication(AuthConfig::plain("u", "p"));
        assert!(valid.validate().is_ok());

        let text = ClusterConfig::new()
            .protocol(Protocol::Text)
            .authentication(AuthConfig::plain("u", "p"));
        assert!(text.validate().is_err());

        let unknown = ClusterConfig::new().authentication(AuthConfig::new("GSSAPI-X"));
        assert!(unknown.validate().is_err());
    }

    #[test]
    fn test_from_json() {
        let config = ClusterConfig::from_json(
            r#"{
                "cluster_endpoint": "cfg.local:11211",
                "servers": ["a:11211", "b:11211"],
                "dead_timeout_ms": 500,
                "poll_interval_ms": -20,
                "locator": "modulo",
                "authentication": {
                    "mechanism": "PLAIN",
                    "parameters": { "userName": "u", "password": "p" }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.dead_timeout, Duration::from_millis(500));
        assert_eq!(config.poll_interval, None);
        assert_eq!(config.locator, LocatorKind::Modulo);
        assert_eq!(config.authentication.unwrap().parameters["userName"], "u");
    }

    #[test]
    fn test_from_json_rejects_bad_input() {
        assert!(ClusterConfig::from_json(r#"{ "servers": ["a:0"] }"#).is_err());
        assert!(ClusterConfig::from_json(r#"{ "dead_timeout_ms": 0 }"#).is_err());
        assert!(ClusterConfig::from_json(r#"{ "unexpected": true }"#).is_err());
    }
}
