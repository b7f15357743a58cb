//! Duplex text-frame transport abstraction over tokio-tungstenite

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection rejected with HTTP status {0}")]
    Rejected(u16),
}

impl TransportError {
    /// True when the server refused the upgrade outright. The handshake never
    /// completed, so this is a credential-type failure rather than a
    /// transient network drop.
    pub fn is_rejection(&self) -> bool {
        matches!(self, TransportError::Rejected(_))
    }
}

/// Full-duplex text-frame socket. Exactly one live transport exists per
/// connection manager at any time.
#[async_trait]
pub trait Transport: Send {
    /// Send a single text frame
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Receive the next inbound text frame. `None` means the peer closed the
    /// connection; an `Err` is a transport-level error (the close follows).
    async fn next_text(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the transport. Never fails; errors during close are moot.
    async fn close(&mut self);
}

/// Opens transports for the connection manager. Tests substitute a
/// channel-backed implementation to simulate the server side.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport over tokio-tungstenite
pub struct WsTransport {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.write
            .send(Message::Text(text.into()))
            .await
            .map_err(TransportError::Connection)
    }

    async fn next_text(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.read.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Ping(_)) => {
                    // Pong is answered by tungstenite itself
                    debug!("Received protocol ping");
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Received close frame");
                    return None;
                }
                Ok(_) => {
                    // Binary/pong frames are not part of the protocol
                }
                Err(e) => return Some(Err(TransportError::Connection(e))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.write.send(Message::Close(None)).await;
        let _ = self.write.close().await;
    }
}

/// Connector backed by `tokio_tungstenite::connect_async`
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        match connect_async(url).await {
            Ok((stream, response)) => {
                debug!(status = ?response.status(), "WebSocket handshake complete");
                let (write, read) = stream.split();
                Ok(Box::new(WsTransport { write, read }))
            }
            // The server answered the upgrade request with an error status:
            // the endpoint is reachable but refused us
            Err(tokio_tungstenite::tungstenite::Error::Http(response)) => {
                Err(TransportError::Rejected(response.status().as_u16()))
            }
            Err(e) => Err(TransportError::Connection(e)),
        }
    }
}
