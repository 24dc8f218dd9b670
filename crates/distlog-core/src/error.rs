//! Error types for distlog

use thiserror::Error;

/// Errors surfaced by the log-service contract
///
/// `OffsetOutOfRange` and `PermissionDenied` are the only errors expected in
/// normal operation; everything else indicates an operational fault.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("offset out of range: {offset}")]
    OffsetOutOfRange { offset: u64 },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("segment corruption: {0}")]
    Corruption(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("stream failed: {0}")]
    Stream(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Create a new Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a new Connect error
    pub fn connect(message: impl Into<String>) -> Self {
        Self::Connect(message.into())
    }

    /// Create a new Stream error
    pub fn stream(message: impl Into<String>) -> Self {
        Self::Stream(message.into())
    }

    /// Whether this error reports a read outside the retained offset range
    pub fn is_offset_out_of_range(&self) -> bool {
        matches!(self, Self::OffsetOutOfRange { .. })
    }

    /// Whether this error is an authorization veto
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Errors returned by an [`Authorizer`](crate::Authorizer)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("{subject} not permitted to {action} to {object}")]
    Denied {
        subject: String,
        object: String,
        action: String,
    },

    #[error("Policy error: {0}")]
    Policy(String),
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Denied { .. } => ServiceError::PermissionDenied(err.to_string()),
            AuthError::Policy(message) => ServiceError::Internal(message),
        }
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
