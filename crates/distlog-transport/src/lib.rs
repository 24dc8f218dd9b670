//! # distlog Transport
//!
//! TCP binding of the distlog log-service contract.
//!
//! ## Features
//!
//! - Length-delimited frames with postcard serialization
//! - [`LogServer`]: serves any [`LogApi`](distlog_core::LogApi) implementation
//! - [`LogClient`]: produce/consume and their streaming variants
//! - [`TcpPeerConnector`]: remote consume streams for replication
//!
//! The first frame on every connection carries the caller identity. This is
//! where an identity taken from a TLS client certificate would be plugged in.
//!
//! ## Example
//!
//! ```rust,ignore
//! use distlog_transport::{LogClient, LogServer, DEFAULT_CONNECT_TIMEOUT};
//! use tokio_util::sync::CancellationToken;
//!
//! let server = LogServer::bind("127.0.0.1:0", service).await?;
//! let addr = server.local_addr()?.to_string();
//! tokio::spawn(server.serve(CancellationToken::new()));
//!
//! let mut client = LogClient::connect(&addr, "root".into(), DEFAULT_CONNECT_TIMEOUT).await?;
//! let offset = client.produce("hello world").await?;
//! ```

pub mod client;
pub mod error;
pub mod protocol;
pub mod server;

// Re-export main types
pub use client::{DEFAULT_CONNECT_TIMEOUT, LogClient, TcpPeerConnector};
pub use error::{FramingError, TransportError, TransportResult};
pub use protocol::{
    ErrorCode, MAX_MESSAGE_SIZE, WireError, WireMessage, codec, decode_message, encode_message,
};
pub use server::LogServer;
