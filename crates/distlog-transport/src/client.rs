//! Log client
//!
//! [`LogClient`] speaks the wire protocol to a [`LogServer`](crate::LogServer).
//! [`TcpPeerConnector`] builds on it so the replicator can stream from
//! remote peers.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, instrument};

use distlog_core::{
    CallerIdentity, OffsetStream, PeerConnector, Record, RecordStream, ServiceError,
    ServiceResult, ValueStream,
};

use crate::error::{TransportError, TransportResult};
use crate::protocol::{WireMessage, codec, next_message, send_message};

/// Default time allowed for establishing a connection
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection to a log server
pub struct LogClient {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    addr: String,
}

impl LogClient {
    /// Connect to `addr` and introduce ourselves as `identity`
    #[instrument(skip(identity))]
    pub async fn connect(
        addr: &str,
        identity: CallerIdentity,
        timeout: Duration,
    ) -> TransportResult<Self> {
        let stream = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(TransportError::Connect {
                    addr: addr.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => return Err(TransportError::Timeout(addr.to_string())),
        };
        stream.set_nodelay(true)?;

        let mut framed = Framed::new(stream, codec());
        send_message(
            &mut framed,
            &WireMessage::Hello {
                identity: identity.as_str().to_string(),
            },
        )
        .await?;

        debug!(caller = %identity, "Connected to log server");
        Ok(Self {
            framed,
            addr: addr.to_string(),
        })
    }

    /// Address of the server
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Append a payload and return its offset
    pub async fn produce(&mut self, value: impl Into<Bytes>) -> ServiceResult<u64> {
        let reply = self
            .request(WireMessage::Produce {
                value: value.into(),
            })
            .await?;
        match reply {
            WireMessage::Produced { offset } => Ok(offset),
            other => Err(unexpected(other)),
        }
    }

    /// Read the record at `offset`
    pub async fn consume(&mut self, offset: u64) -> ServiceResult<Record> {
        match self.request(WireMessage::Consume { offset }).await? {
            WireMessage::Consumed { record } => Ok(record),
            other => Err(unexpected(other)),
        }
    }

    /// Produce every value in order, yielding each assigned offset
    ///
    /// Values are sent one at a time; the stream ends after the first error.
    pub fn produce_stream(mut self, mut values: ValueStream) -> OffsetStream {
        Box::pin(async_stream::stream! {
            while let Some(value) = values.next().await {
                let result = self.produce(value).await;
                let failed = result.is_err();
                yield result;
                if failed {
                    break;
                }
            }
        })
    }

    /// Stream records from `offset` onward, including future appends
    ///
    /// The connection is dedicated to the stream; dropping the stream closes
    /// it.
    pub async fn consume_stream(mut self, offset: u64) -> ServiceResult<RecordStream> {
        send_message(&mut self.framed, &WireMessage::ConsumeStream { offset })
            .await
            .map_err(ServiceError::from)?;

        let mut framed = self.framed;
        Ok(Box::pin(async_stream::stream! {
            loop {
                match next_message(&mut framed).await {
                    Ok(Some(WireMessage::Consumed { record })) => yield Ok(record),
                    Ok(Some(WireMessage::Error(e))) => {
                        yield Err(ServiceError::from(e));
                        break;
                    }
                    Ok(Some(other)) => {
                        yield Err(unexpected(other));
                        break;
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(ServiceError::from(e));
                        break;
                    }
                }
            }
        }))
    }

    async fn request(&mut self, msg: WireMessage) -> ServiceResult<WireMessage> {
        send_message(&mut self.framed, &msg).await?;
        match next_message(&mut self.framed).await? {
            Some(WireMessage::Error(e)) => Err(e.into()),
            Some(reply) => Ok(reply),
            None => Err(TransportError::StreamClosed.into()),
        }
    }
}

impl std::fmt::Debug for LogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogClient").field("addr", &self.addr).finish()
    }
}

fn unexpected(msg: WireMessage) -> ServiceError {
    TransportError::UnexpectedMessage(format!("{:?}", msg)).into()
}

/// [`PeerConnector`] that reaches peers over TCP
#[derive(Debug, Clone)]
pub struct TcpPeerConnector {
    identity: CallerIdentity,
    connect_timeout: Duration,
}

impl TcpPeerConnector {
    /// Create a connector that identifies itself as `identity`
    pub fn new(identity: CallerIdentity) -> Self {
        Self {
            identity,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl PeerConnector for TcpPeerConnector {
    async fn consume_stream(&self, addr: &str, offset: u64) -> ServiceResult<RecordStream> {
        let client = LogClient::connect(addr, self.identity.clone(), self.connect_timeout).await?;
        client.consume_stream(offset).await
    }
}
