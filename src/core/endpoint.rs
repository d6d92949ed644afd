use super::error::{ClusterError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Network identity of a cache node.
///
/// Two endpoints are the same node when host (case-insensitively) and port match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// Creates a validated endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let host = host.into();
        let trimmed = host.trim();
        if trimmed.is_empty() {
            return Err(ClusterError::InvalidEndpoint(
                format!("{}:{}", host, port),
                "host must not be empty".to_string(),
            ));
        }
        if port == 0 {
            return Err(ClusterError::InvalidEndpoint(
                format!("{}:{}", trimmed, port),
                "port must be > 0".to_string(),
            ));
        }
        Ok(Self {
            host: trimmed.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Parses a comma separated `host:port` list, skipping blank entries.
    pub fn parse_list(list: &str) -> Result<Vec<Self>> {
        list.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(str::parse)
            .collect()
    }

    /// `host:port` with the host lowercased; equal endpoints share one label
    pub fn canonical(&self) -> String {
        format!("{}:{}", self.host.to_ascii_lowercase(), self.port)
    }

    fn key(&self) -> (String, u16) {
        (self.host.to_ascii_lowercase(), self.port)
    }
}

impl FromStr for Endpoint {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let (host, port) = s.rsplit_once(':').ok_or_else(|| {
            ClusterError::InvalidEndpoint(s.to_string(), "expected host:port".to_string())
        })?;

        // Negative or overflowing ports are rejected here rather than wrapped.
        let port: i64 = port.trim().parse().map_err(|_| {
            ClusterError::InvalidEndpoint(s.to_string(), "port is not a number".to_string())
        })?;
        if port <= 0 || port > u16::MAX as i64 {
            return Err(ClusterError::InvalidEndpoint(
                s.to_string(),
                format!("port {} is out of range", port),
            ));
        }

        Self::new(host, port as u16)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = ClusterError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(value: Endpoint) -> Self {
        value.to_string()
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Endpoint {}

impl std::hash::Hash for Endpoint {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}
