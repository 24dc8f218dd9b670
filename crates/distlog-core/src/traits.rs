//! Core traits for distlog
//!
//! These traits are the seams between the storage engine, the service
//! facade, the transport binding and the pluggable collaborators.
//!
//! ## Key Traits
//!
//! - [`LogApi`]: The log-service contract used by clients and the replicator
//! - [`Authorizer`]: Synchronous access check
//! - [`MembershipHandler`]: Join/leave notifications from a membership provider
//! - [`PeerConnector`]: Opens a consume stream on a remote peer

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;

use crate::error::{AuthError, ServiceResult};
use crate::identity::CallerIdentity;
use crate::record::Record;

/// Stream of records delivered by a consume stream
pub type RecordStream = Pin<Box<dyn Stream<Item = ServiceResult<Record>> + Send>>;

/// Stream of assigned offsets returned by a produce stream
pub type OffsetStream = Pin<Box<dyn Stream<Item = ServiceResult<u64>> + Send>>;

/// Stream of payloads sent into a produce stream
pub type ValueStream = Pin<Box<dyn Stream<Item = Bytes> + Send>>;

/// The log-service contract
///
/// Implemented by the local service facade and by remote clients, so the
/// same code can talk to either.
#[async_trait]
pub trait LogApi: Send + Sync {
    /// Append a payload and return its assigned offset
    async fn produce(&self, caller: &CallerIdentity, value: Bytes) -> ServiceResult<u64>;

    /// Read the record at `offset`
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::OffsetOutOfRange` if the offset is not retained.
    async fn consume(&self, caller: &CallerIdentity, offset: u64) -> ServiceResult<Record>;

    /// Append every payload of `values`, yielding one offset per payload in order
    async fn produce_stream(
        &self,
        caller: &CallerIdentity,
        values: ValueStream,
    ) -> ServiceResult<OffsetStream>;

    /// Stream every record from `offset` onward, including records appended
    /// after the stream was opened
    ///
    /// Dropping the returned stream cancels it.
    async fn consume_stream(
        &self,
        caller: &CallerIdentity,
        offset: u64,
    ) -> ServiceResult<RecordStream>;
}

/// Access check keyed by caller identity
pub trait Authorizer: Send + Sync {
    /// Check whether `subject` may perform `action` on `object`
    fn authorize(&self, subject: &str, object: &str, action: &str) -> Result<(), AuthError>;
}

/// Handler invoked by a membership provider
///
/// Both calls must be idempotent: providers may report the same peer more
/// than once.
pub trait MembershipHandler: Send + Sync {
    /// A peer joined the cluster
    fn join(&self, name: &str, addr: &str) -> ServiceResult<()>;

    /// A peer left or failed
    fn leave(&self, name: &str) -> ServiceResult<()>;
}

/// Opens a consume stream on a remote peer
#[async_trait]
pub trait PeerConnector: Send + Sync {
    /// Connect to `addr` and stream its records from `offset`
    ///
    /// # Errors
    ///
    /// Returns `ServiceError::Connect` if the peer is unreachable.
    async fn consume_stream(&self, addr: &str, offset: u64) -> ServiceResult<RecordStream>;
}
