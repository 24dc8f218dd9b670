//! Wire protocol for distlog
//!
//! Every frame is a 4-byte big-endian length followed by a postcard-encoded
//! [`WireMessage`]. Framing is done by `tokio_util`'s `LengthDelimitedCodec`.
//!
//! ## Conversation
//!
//! | Client → server | Server → client |
//! |---|---|
//! | `Hello { identity }` (first frame) | |
//! | `Produce { value }` | `Produced { offset }` or `Error` |
//! | `Consume { offset }` | `Consumed { record }` or `Error` |
//! | `ConsumeStream { offset }` | `Consumed { record }`* then `Error` or close |
//!
//! Requests on one connection are answered in order, so a run of `Produce`
//! frames is a produce stream. `ConsumeStream` dedicates the connection to
//! the stream until either side closes it.

use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::codec::LengthDelimitedCodec;

use distlog_core::{Record, ServiceError};

use crate::error::TransportResult;

/// Maximum frame size (4 MB)
pub const MAX_MESSAGE_SIZE: usize = 4 * 1024 * 1024;

/// Messages exchanged between a client and a log server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireMessage {
    /// Identity of the caller, sent once when the connection opens
    Hello { identity: String },

    /// Append a payload
    Produce { value: Bytes },

    /// Offset assigned to a produced payload
    Produced { offset: u64 },

    /// Read a single record
    Consume { offset: u64 },

    /// A record, in reply to `Consume` or as an item of a consume stream
    Consumed { record: Record },

    /// Stream every record from `offset` onward
    ConsumeStream { offset: u64 },

    /// A failed request
    Error(WireError),
}

/// Service error categories carried over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    OffsetOutOfRange,
    PermissionDenied,
    Storage,
    Corruption,
    Unavailable,
    InvalidRequest,
    Internal,
}

/// A service error in wire form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    /// Requested offset, set for `OffsetOutOfRange`
    pub offset: Option<u64>,
}

impl WireError {
    /// Create a new wire error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            offset: None,
        }
    }
}

impl From<&ServiceError> for WireError {
    fn from(err: &ServiceError) -> Self {
        match err {
            ServiceError::OffsetOutOfRange { offset } => Self {
                code: ErrorCode::OffsetOutOfRange,
                message: err.to_string(),
                offset: Some(*offset),
            },
            ServiceError::PermissionDenied(msg) => Self::new(ErrorCode::PermissionDenied, msg.clone()),
            ServiceError::Storage(msg) => Self::new(ErrorCode::Storage, msg.clone()),
            ServiceError::Corruption(msg) => Self::new(ErrorCode::Corruption, msg.clone()),
            ServiceError::Connect(msg)
            | ServiceError::Stream(msg)
            | ServiceError::Unavailable(msg) => Self::new(ErrorCode::Unavailable, msg.clone()),
            ServiceError::InvalidRequest(msg) => Self::new(ErrorCode::InvalidRequest, msg.clone()),
            ServiceError::Internal(msg) => Self::new(ErrorCode::Internal, msg.clone()),
        }
    }
}

impl From<WireError> for ServiceError {
    fn from(err: WireError) -> Self {
        match err.code {
            ErrorCode::OffsetOutOfRange => ServiceError::OffsetOutOfRange {
                offset: err.offset.unwrap_or_default(),
            },
            ErrorCode::PermissionDenied => ServiceError::PermissionDenied(err.message),
            ErrorCode::Storage => ServiceError::Storage(err.message),
            ErrorCode::Corruption => ServiceError::Corruption(err.message),
            ErrorCode::Unavailable => ServiceError::Unavailable(err.message),
            ErrorCode::InvalidRequest => ServiceError::InvalidRequest(err.message),
            ErrorCode::Internal => ServiceError::Internal(err.message),
        }
    }
}

/// Length-delimited codec configured for distlog frames
pub fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(MAX_MESSAGE_SIZE)
        .new_codec()
}

/// Serialize a message into a frame body
pub fn encode_message(msg: &WireMessage) -> Result<Bytes, FramingError> {
    let serialized =
        postcard::to_allocvec(msg).map_err(|e| FramingError::Serialization(e.to_string()))?;

    if serialized.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge {
            size: serialized.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }

    Ok(Bytes::from(serialized))
}

/// Deserialize a frame body
pub fn decode_message(data: &[u8]) -> Result<WireMessage, FramingError> {
    postcard::from_bytes(data).map_err(|e| FramingError::Deserialization(e.to_string()))
}

/// Encode and send one message
pub(crate) async fn send_message<S>(sink: &mut S, msg: &WireMessage) -> TransportResult<()>
where
    S: Sink<Bytes, Error = std::io::Error> + Unpin,
{
    let frame = encode_message(msg)?;
    sink.send(frame).await?;
    Ok(())
}

/// Receive and decode the next message, `None` once the peer closed
pub(crate) async fn next_message<S>(frames: &mut S) -> TransportResult<Option<WireMessage>>
where
    S: Stream<Item = Result<BytesMut, std::io::Error>> + Unpin,
{
    match frames.next().await {
        Some(frame) => Ok(Some(decode_message(&frame?)?)),
        None => Ok(None),
    }
}

/// Errors that can occur during message framing
#[derive(Debug, Clone, thiserror::Error)]
pub enum FramingError {
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}
