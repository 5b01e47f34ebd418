//! In-process connector: every `connect` hands a [`MemoryPeer`] to the [`MemoryListener`].
//!
//! The peer plays the gateway side. Like a real WebSocket, each end answers transport pings
//! on its own: the peer unless auto-pong is switched off, the client socket always.

use super::{Connector, Socket, SocketError, WireMessage};
use crate::gateway::protocol::{
    decode_frame, encode_frame, EventFrame, Frame, RequestFrame, ResponseFrame,
};
use async_trait::async_trait;
use futures_util::{sink, stream};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Client side of an in-process link.
#[derive(Clone)]
pub struct MemoryConnector {
    accept_tx: mpsc::UnboundedSender<MemoryPeer>,
    shared: Arc<Shared>,
}

/// Gateway side: yields one peer per successful connect.
pub struct MemoryListener {
    accept_rx: mpsc::UnboundedReceiver<MemoryPeer>,
    shared: Arc<Shared>,
}

struct Shared {
    refusing: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> (MemoryConnector, MemoryListener) {
        let (accept_tx, accept_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            refusing: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        });
        (
            MemoryConnector {
                accept_tx,
                shared: shared.clone(),
            },
            MemoryListener { accept_rx, shared },
        )
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _url: &str) -> Result<Socket, SocketError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if self.shared.refusing.load(Ordering::SeqCst) {
            return Err(SocketError::new("connection refused"));
        }

        let (to_peer_tx, to_peer_rx) = mpsc::unbounded_channel();
        let (to_client_tx, to_client_rx) = mpsc::unbounded_channel();
        let auto_pong = Arc::new(AtomicBool::new(true));
        let peer = MemoryPeer {
            rx: to_peer_rx,
            tx: to_client_tx.clone(),
            auto_pong: auto_pong.clone(),
        };
        self.accept_tx
            .send(peer)
            .map_err(|_| SocketError::new("listener closed"))?;

        // Weak so the client's read half ends once the peer is dropped.
        let back = to_client_tx.downgrade();
        drop(to_client_tx);
        let pong_tx = to_peer_tx.clone();
        let sink = sink::unfold(
            (to_peer_tx, back, auto_pong),
            |(tx, back, auto_pong), msg: WireMessage| async move {
                if tx.is_closed() {
                    return Err(SocketError::new("peer closed"));
                }
                match msg {
                    WireMessage::Ping(data) if auto_pong.load(Ordering::SeqCst) => {
                        if let Some(back) = back.upgrade() {
                            let _ = back.send(WireMessage::Pong(data));
                        }
                    }
                    msg => tx.send(msg).map_err(|_| SocketError::new("peer closed"))?,
                }
                Ok((tx, back, auto_pong))
            },
        );
        let stream = stream::unfold((to_client_rx, pong_tx), |(mut rx, pong_tx)| async move {
            let msg = rx.recv().await?;
            if let WireMessage::Ping(data) = &msg {
                let _ = pong_tx.send(WireMessage::Pong(data.clone()));
            }
            Some((Ok(msg), (rx, pong_tx)))
        });
        Ok(Socket::new(sink, stream))
    }
}

impl MemoryListener {
    /// Next connected peer; `None` once every connector is dropped.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.accept_rx.recv().await
    }

    /// While refusing, `connect` fails as if the gateway were down.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Total connect calls seen, refused ones included.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// Gateway end of one in-process socket.
pub struct MemoryPeer {
    rx: mpsc::UnboundedReceiver<WireMessage>,
    tx: mpsc::UnboundedSender<WireMessage>,
    auto_pong: Arc<AtomicBool>,
}

impl MemoryPeer {
    pub fn set_auto_pong(&self, on: bool) {
        self.auto_pong.store(on, Ordering::SeqCst);
    }

    /// Next raw message from the client; `None` once the client side is gone.
    pub async fn recv(&mut self) -> Option<WireMessage> {
        self.rx.recv().await
    }

    /// Next decodable frame. Pings and pongs are skipped; a Close ends the stream.
    pub async fn recv_frame(&mut self) -> Option<Frame> {
        loop {
            match self.rx.recv().await? {
                WireMessage::Text(text) => {
                    if let Some(frame) = decode_frame(&text) {
                        return Some(frame);
                    }
                }
                WireMessage::Close => return None,
                WireMessage::Ping(_) | WireMessage::Pong(_) => {}
            }
        }
    }

    /// Next `req` frame, skipping anything else.
    pub async fn recv_request(&mut self) -> Option<RequestFrame> {
        loop {
            if let Frame::Req(req) = self.recv_frame().await? {
                return Some(req);
            }
        }
    }

    /// Read the `connect` request and answer it with a hello-ok.
    pub async fn accept_handshake(&mut self) -> Option<RequestFrame> {
        let req = self.recv_request().await?;
        if req.method != "connect" {
            return None;
        }
        self.respond_ok(
            &req.id,
            json!({ "type": "hello-ok", "protocol": 3, "policy": { "tickIntervalMs": 15000 } }),
        );
        Some(req)
    }

    pub fn send(&self, msg: WireMessage) -> bool {
        self.tx.send(msg).is_ok()
    }

    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(WireMessage::Text(text.into()))
    }

    pub fn send_frame(&self, frame: &Frame) -> bool {
        match encode_frame(frame) {
            Ok(text) => self.send_text(text),
            Err(_) => false,
        }
    }

    pub fn respond_ok(&self, id: &str, payload: Value) -> bool {
        self.send_frame(&Frame::Res(ResponseFrame::ok(id, payload)))
    }

    pub fn respond_err(&self, id: &str, code: &str, message: &str) -> bool {
        self.send_frame(&Frame::Res(ResponseFrame::err(id, code, message)))
    }

    pub fn emit(&self, event: &str, payload: Value) -> bool {
        self.send_frame(&Frame::Event(EventFrame {
            event: event.to_string(),
            payload: Some(payload),
            seq: None,
        }))
    }

    /// Send a Close frame and drop this end.
    pub fn close(self) {
        let _ = self.tx.send(WireMessage::Close);
    }
}
