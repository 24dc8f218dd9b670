//! Error types for the node

use thiserror::Error;

use distlog_core::{AuthError, ServiceError};
use distlog_storage::StorageError;
use distlog_transport::TransportError;

/// Errors that can occur while running a node
#[derive(Debug, Error)]
pub enum NodeError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Transport layer error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Service error
    #[error("Service error: {0}")]
    Service(#[from] ServiceError),

    /// Node already started
    #[error("Node already started")]
    AlreadyStarted,

    /// Node not started
    #[error("Node not started")]
    NotStarted,

    /// Node was stopped and cannot be restarted
    #[error("Node stopped")]
    Stopped,
}

impl From<AuthError> for NodeError {
    fn from(e: AuthError) -> Self {
        NodeError::Config(e.to_string())
    }
}

impl From<toml::de::Error> for NodeError {
    fn from(e: toml::de::Error) -> Self {
        NodeError::Config(e.to_string())
    }
}

/// Result type alias for node operations
pub type NodeResult<T> = Result<T, NodeError>;
