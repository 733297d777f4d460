//! Error types for the shard drain operator

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error (listing pods, updating annotations, events)
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Operator configuration is invalid or incomplete
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Reading the topology store failed
    #[error("Topology error: {0}")]
    TopologyError(String),

    /// A tablet manager RPC (replication status, reparent, admin command) failed
    #[error("Tablet RPC error: {0}")]
    RpcError(String),

    /// A replication position could not be decoded
    #[error("Failed to decode replication position {position:?}: {reason}")]
    PositionDecodeError { position: String, reason: String },

    /// The requested mysqld image change is a downgrade that cannot be done safely
    #[error("Unsupported downgrade: {0}")]
    UnsupportedDowngrade(String),

    /// An external call did not complete in time
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// HTTP transport error talking to vtctld
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error is likely to clear on its own, warranting a quick retry
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::KubeError(_)
                | Error::TopologyError(_)
                | Error::RpcError(_)
                | Error::Timeout { .. }
                | Error::HttpError(_)
        )
    }

    /// Short label used for the error metric
    pub fn metric_label(&self) -> &'static str {
        match self {
            Error::KubeError(_) => "kube",
            Error::ConfigError(_) => "config",
            Error::TopologyError(_) => "topology",
            Error::RpcError(_) => "rpc",
            Error::PositionDecodeError { .. } => "position",
            Error::UnsupportedDowngrade(_) => "downgrade",
            Error::Timeout { .. } => "timeout",
            Error::HttpError(_) => "http",
            Error::SerializationError(_) => "serialization",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
