//! A write that fails for one queued request rejects only that request; the rest of the queue
//! still goes out.

use async_trait::async_trait;
use futures_util::{stream, Sink};
use gatelink::config::ClientConfig;
use gatelink::gateway::protocol::{decode_frame, encode_frame, Frame, RequestFrame, ResponseFrame};
use gatelink::transport::{Connector, Socket, SocketError, WireMessage};
use gatelink::{GatewayClient, GatewayError};
use serde_json::{json, Value};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Write half that refuses any text frame containing `reject`.
struct RejectingSink {
    tx: mpsc::UnboundedSender<WireMessage>,
    reject: &'static str,
}

impl Sink<WireMessage> for RejectingSink {
    type Error = SocketError;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), SocketError>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, msg: WireMessage) -> Result<(), SocketError> {
        if let WireMessage::Text(text) = &msg {
            if text.contains(self.reject) {
                return Err(SocketError::new("frame rejected by transport"));
            }
        }
        self.tx
            .send(msg)
            .map_err(|_| SocketError::new("gateway gone"))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), SocketError>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), SocketError>> {
        Poll::Ready(Ok(()))
    }
}

/// Hands the gateway end of every socket it opens to the test.
struct RejectingConnector {
    accepted: mpsc::UnboundedSender<GatewayEnd>,
}

struct GatewayEnd {
    from_client: mpsc::UnboundedReceiver<WireMessage>,
    to_client: mpsc::UnboundedSender<WireMessage>,
}

#[async_trait]
impl Connector for RejectingConnector {
    async fn connect(&self, _url: &str) -> Result<Socket, SocketError> {
        let (to_gateway_tx, from_client) = mpsc::unbounded_channel();
        let (to_client, to_client_rx) = mpsc::unbounded_channel();
        self.accepted
            .send(GatewayEnd {
                from_client,
                to_client,
            })
            .map_err(|_| SocketError::new("test gateway gone"))?;
        let sink = RejectingSink {
            tx: to_gateway_tx,
            reject: r#""method":"bad""#,
        };
        let stream = stream::unfold(to_client_rx, |mut rx| async move {
            rx.recv().await.map(|msg| (Ok(msg), rx))
        });
        Ok(Socket::new(sink, stream))
    }
}

impl GatewayEnd {
    async fn next_request(&mut self) -> RequestFrame {
        loop {
            let msg = self.from_client.recv().await.expect("client open");
            if let WireMessage::Text(text) = msg {
                if let Some(Frame::Req(req)) = decode_frame(&text) {
                    return req;
                }
            }
        }
    }

    fn reply(&self, id: &str, payload: Value) {
        let text = encode_frame(&Frame::Res(ResponseFrame::ok(id, payload))).unwrap();
        self.to_client.send(WireMessage::Text(text)).unwrap();
    }
}

#[tokio::test]
async fn failed_write_rejects_only_that_request() {
    let (accepted, mut accept_rx) = mpsc::unbounded_channel();
    let mut config = ClientConfig::default();
    config.auth.token = Some("abc".to_string());
    let client = GatewayClient::with_connector(config, RejectingConnector { accepted }).unwrap();

    let a = client.request::<Value, _>("a", ());
    let bad = client.request::<Value, _>("bad", ());
    let c = client.request::<Value, _>("c", ());

    let mut gateway = accept_rx.recv().await.expect("client connects");
    let connect = gateway.next_request().await;
    assert_eq!(connect.method, "connect");
    gateway.reply(&connect.id, json!({ "type": "hello-ok", "protocol": 3 }));

    let first = gateway.next_request().await;
    let second = gateway.next_request().await;
    assert_eq!(first.method, "a");
    assert_eq!(second.method, "c");
    gateway.reply(&first.id, json!("a"));
    gateway.reply(&second.id, json!("c"));

    assert!(matches!(bad.await, Err(GatewayError::Send(_))));
    assert_eq!(a.await.unwrap(), json!("a"));
    assert_eq!(c.await.unwrap(), json!("c"));
    client.shutdown().await;
}
