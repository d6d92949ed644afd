use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid endpoint '{0}': {1}")]
    InvalidEndpoint(String, String),

    #[error("Discovery unreachable: {0}")]
    DiscoveryUnreachable(String),

    #[error("Node error: {0}")]
    NodeError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Server pool is disposed")]
    PoolDisposed,

    #[error("Server pool already started")]
    AlreadyStarted,

    #[error("Server pool has not been started")]
    NotStarted,

    #[error("No async runtime available: {0}")]
    RuntimeUnavailable(String),
}

pub type Result<T> = std::result::Result<T, ClusterError>;

impl From<tokio::runtime::TryCurrentError> for ClusterError {
    fn from(err: tokio::runtime::TryCurrentError) -> Self {
        Self::RuntimeUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for ClusterError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}
