//! Log server
//!
//! Accepts TCP connections and serves the log-service contract over the
//! wire protocol. One task per connection; requests on a connection are
//! handled in order.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use distlog_core::{CallerIdentity, LogApi, ServiceError};

use crate::error::{TransportError, TransportResult};
use crate::protocol::{WireError, WireMessage, codec, next_message, send_message};

type WireSink = SplitSink<Framed<TcpStream, LengthDelimitedCodec>, Bytes>;
type WireFrames = SplitStream<Framed<TcpStream, LengthDelimitedCodec>>;

/// TCP server for a [`LogApi`] implementation
pub struct LogServer {
    listener: TcpListener,
    service: Arc<dyn LogApi>,
}

impl LogServer {
    /// Bind a listener on `addr`
    pub async fn bind(addr: impl ToSocketAddrs, service: Arc<dyn LogApi>) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %listener.local_addr()?, "Log server listening");
        Ok(Self { listener, service })
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` is cancelled
    ///
    /// Cancelling also ends every open connection, including consume streams.
    pub async fn serve(self, shutdown: CancellationToken) -> TransportResult<()> {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Log server shutting down");
                    break;
                }
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let service = Arc::clone(&self.service);
                            let shutdown = shutdown.child_token();
                            tokio::spawn(async move {
                                match handle_connection(stream, addr, service, shutdown).await {
                                    Ok(()) => debug!(client = %addr, "Connection closed"),
                                    Err(e) => warn!(client = %addr, error = %e, "Connection error"),
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Serve one client connection
#[instrument(skip(stream, service, shutdown), fields(client = %addr))]
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    service: Arc<dyn LogApi>,
    shutdown: CancellationToken,
) -> TransportResult<()> {
    stream.set_nodelay(true)?;
    let (mut sink, mut frames) = Framed::new(stream, codec()).split();

    let identity = match next_message(&mut frames).await? {
        Some(WireMessage::Hello { identity }) => CallerIdentity::new(identity),
        Some(other) => {
            let err = ServiceError::InvalidRequest("expected Hello".into());
            send_message(&mut sink, &WireMessage::Error(WireError::from(&err))).await?;
            return Err(TransportError::UnexpectedMessage(format!("{:?}", other)));
        }
        None => return Ok(()),
    };
    debug!(caller = %identity, "Client said hello");

    loop {
        let msg = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            msg = next_message(&mut frames) => msg?,
        };

        let reply = match msg {
            None => break,
            Some(WireMessage::Produce { value }) => service
                .produce(&identity, value)
                .await
                .map(|offset| WireMessage::Produced { offset }),
            Some(WireMessage::Consume { offset }) => service
                .consume(&identity, offset)
                .await
                .map(|record| WireMessage::Consumed { record }),
            Some(WireMessage::ConsumeStream { offset }) => {
                return serve_consume_stream(sink, frames, service, identity, offset, shutdown)
                    .await;
            }
            Some(other) => Err(ServiceError::InvalidRequest(format!(
                "unexpected request {:?}",
                other
            ))),
        };

        let reply = reply.unwrap_or_else(|e| WireMessage::Error(WireError::from(&e)));
        send_message(&mut sink, &reply).await?;
    }

    close_quietly(sink).await;
    Ok(())
}

/// Push records to the client until either side stops
async fn serve_consume_stream(
    mut sink: WireSink,
    mut frames: WireFrames,
    service: Arc<dyn LogApi>,
    identity: CallerIdentity,
    offset: u64,
    shutdown: CancellationToken,
) -> TransportResult<()> {
    let mut records = match service.consume_stream(&identity, offset).await {
        Ok(records) => records,
        Err(e) => {
            send_message(&mut sink, &WireMessage::Error(WireError::from(&e))).await?;
            return Ok(());
        }
    };
    debug!(offset, "Consume stream opened");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            inbound = frames.next() => match inbound {
                None => break,
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(_)) => warn!("Ignoring request on a consume-stream connection"),
            },
            item = records.next() => match item {
                Some(Ok(record)) => {
                    send_message(&mut sink, &WireMessage::Consumed { record }).await?;
                }
                Some(Err(e)) => {
                    send_message(&mut sink, &WireMessage::Error(WireError::from(&e))).await?;
                    break;
                }
                None => break,
            },
        }
    }

    debug!("Consume stream closed");
    close_quietly(sink).await;
    Ok(())
}

/// Close the connection, tolerating a peer that already left
async fn close_quietly(mut sink: WireSink) {
    if let Err(e) = sink.close().await {
        debug!(error = %e, "Closing connection failed");
    }
}
