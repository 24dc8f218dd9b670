//! Transport layer error types

pub use crate::protocol::FramingError;

use distlog_core::ServiceError;
use thiserror::Error;

/// Unified transport error type
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol framing error: {0}")]
    Framing(#[from] FramingError),

    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("Timed out connecting to {0}")]
    Timeout(String),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Stream closed")]
    StreamClosed,
}

impl TransportError {
    /// Whether the error happened before a connection was established
    pub fn is_connect(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Timeout(_))
    }
}

impl From<TransportError> for ServiceError {
    fn from(err: TransportError) -> Self {
        if err.is_connect() {
            ServiceError::connect(err.to_string())
        } else {
            ServiceError::stream(err.to_string())
        }
    }
}

/// Result type alias for transport operations
pub type TransportResult<T> = Result<T, TransportError>;
