//! Socket abstraction used by the gateway connection.
//!
//! The connection task depends only on [`Connector`] and [`Socket`]: open a socket, send
//! messages, read messages, close. [`WsConnector`] speaks real WebSocket via
//! tokio-tungstenite; [`MemoryConnector`] wires sockets to in-process peers.

mod memory;
mod ws;

pub use memory::{MemoryConnector, MemoryListener, MemoryPeer};
pub use ws::WsConnector;

use async_trait::async_trait;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use thiserror::Error;

/// One transport-level message. Text carries a JSON frame; ping/pong are transport heartbeats.
/// Connectors answer incoming pings themselves, so a `Ping` read from a [`Socket`] is
/// informational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Text(String),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SocketError(String);

impl SocketError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type MessageSink = Pin<Box<dyn Sink<WireMessage, Error = SocketError> + Send>>;
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<WireMessage, SocketError>> + Send>>;

/// One open connection: a write half and a read half.
pub struct Socket {
    sink: MessageSink,
    stream: MessageStream,
}

impl Socket {
    pub fn new<S, R>(sink: S, stream: R) -> Self
    where
        S: Sink<WireMessage, Error = SocketError> + Send + 'static,
        R: Stream<Item = Result<WireMessage, SocketError>> + Send + 'static,
    {
        Self {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        }
    }

    pub async fn send(&mut self, msg: WireMessage) -> Result<(), SocketError> {
        self.sink.send(msg).await
    }

    pub async fn send_text(&mut self, text: String) -> Result<(), SocketError> {
        self.send(WireMessage::Text(text)).await
    }

    /// Next message; `None` once the peer is gone.
    pub async fn recv(&mut self) -> Option<Result<WireMessage, SocketError>> {
        self.stream.next().await
    }

    /// Best-effort graceful close (Close frame, then flush and close the sink).
    pub async fn close(&mut self) {
        if let Err(e) = self.sink.send(WireMessage::Close).await {
            log::debug!("close frame not sent: {}", e);
        }
        let _ = self.sink.close().await;
    }
}

/// Opens sockets to a URL.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Socket, SocketError>;
}
