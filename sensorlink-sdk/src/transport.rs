//! Telemetry socket transport.
//!
//! [`Connector`] and [`Socket`] are the seam between the connection state
//! machine and the network. [`WsConnector`] is the production implementation
//! on top of `tokio-tungstenite`; tests plug in channel-backed sockets.
//!
//! Frames are reduced to what the state machine cares about: text payloads,
//! liveness pings from the platform, and the close. Pongs are answered by
//! tungstenite itself and never surface here.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::auth::Token;
use crate::error::TransportError;
use crate::protocol::TELEMETRY_WS_PATH;

/// An inbound event on a telemetry socket.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Text(String),
    /// Transport-level keep-alive from the platform.
    Ping,
    /// The peer started (or completed) the closing handshake.
    Close,
}

/// An open telemetry socket.
///
/// Dropping a socket without calling [`Socket::close`] terminates it
/// without a closing handshake.
#[async_trait]
pub trait Socket: Send {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Next inbound frame. `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Graceful close.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens telemetry sockets.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError>;
}

/// Build the telemetry socket URL for a token.
pub fn telemetry_url(ws_base_url: &str, token: &Token) -> String {
    let base = ws_base_url.trim_end_matches('/');
    let token = utf8_percent_encode(token.as_str(), NON_ALPHANUMERIC);
    format!("{base}{TELEMETRY_WS_PATH}?token={token}")
}

/// `tokio-tungstenite` connector.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(url))
            .await
            .map_err(|_| TransportError::ConnectTimeout(self.connect_timeout))??;
        Ok(Box::new(WsSocket { stream }))
    }
}

/// A live `tokio-tungstenite` stream.
pub struct WsSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for WsSocket {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.stream.send(WsMessage::Text(text.into())).await?;
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let msg = match self.stream.next().await? {
                Ok(msg) => msg,
                Err(e) => return Some(Err(e.into())),
            };
            let frame = match msg {
                WsMessage::Text(text) => Frame::Text(text.as_str().to_owned()),
                WsMessage::Binary(bytes) => Frame::Text(String::from_utf8_lossy(&bytes).into_owned()),
                WsMessage::Ping(_) => Frame::Ping,
                WsMessage::Close(_) => Frame::Close,
                WsMessage::Pong(_) | WsMessage::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.close(None).await?;
        Ok(())
    }
}
