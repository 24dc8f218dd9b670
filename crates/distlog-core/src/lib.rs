//! # distlog Core
//!
//! Core types, traits, and errors shared by every layer of the distlog
//! commit-log service.
//!
//! ## Key Traits
//!
//! - [`LogApi`]: The log-service contract (produce/consume and their streaming variants)
//! - [`Authorizer`]: Access check keyed by caller identity
//! - [`MembershipHandler`]: Join/leave handler driven by a membership provider
//! - [`PeerConnector`]: Opens a consume stream on a remote peer
//!
//! ## Key Types
//!
//! - [`Record`]: An opaque payload with its assigned offset
//! - [`CallerIdentity`]: The authenticated identity of a caller
//! - [`ServiceError`]: Errors surfaced by the log-service contract

pub mod auth;
pub mod error;
pub mod identity;
pub mod record;
pub mod traits;

// Re-export main types
pub use auth::{AclAuthorizer, AclRule, AllowAll, CONSUME_ACTION, PRODUCE_ACTION, WILDCARD};
pub use error::{AuthError, ServiceError, ServiceResult};
pub use identity::CallerIdentity;
pub use record::Record;
pub use traits::{
    Authorizer, LogApi, MembershipHandler, OffsetStream, PeerConnector, RecordStream, ValueStream,
};
