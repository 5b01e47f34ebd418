//! WebSocket connector over tokio-tungstenite.

use super::{Connector, Socket, SocketError, WireMessage};
use async_trait::async_trait;
use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

/// Connects with `tokio_tungstenite::connect_async` (ws:// and wss:// URLs).
/// Tungstenite queues the pong for every incoming ping on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Socket, SocketError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| SocketError::new(e.to_string()))?;
        let (sink, stream) = ws.split();
        let sink = sink
            .sink_map_err(|e| SocketError::new(e.to_string()))
            .with(|msg: WireMessage| future::ready(Ok::<_, SocketError>(to_message(msg))));
        let stream = stream.filter_map(|item| {
            future::ready(match item {
                Ok(msg) => from_message(msg).map(Ok),
                Err(e) => Some(Err(SocketError::new(e.to_string()))),
            })
        });
        Ok(Socket::new(sink, stream))
    }
}

fn to_message(msg: WireMessage) -> Message {
    match msg {
        WireMessage::Text(text) => Message::Text(text),
        WireMessage::Ping(data) => Message::Ping(data),
        WireMessage::Pong(data) => Message::Pong(data),
        WireMessage::Close => Message::Close(None),
    }
}

/// Binary and raw frames are not part of the protocol and are skipped.
fn from_message(msg: Message) -> Option<WireMessage> {
    match msg {
        Message::Text(text) => Some(WireMessage::Text(text)),
        Message::Ping(data) => Some(WireMessage::Ping(data)),
        Message::Pong(data) => Some(WireMessage::Pong(data)),
        Message::Close(_) => Some(WireMessage::Close),
        Message::Binary(data) => {
            log::debug!("ignoring binary message ({} bytes)", data.len());
            None
        }
        Message::Frame(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_is_skipped() {
        assert_eq!(from_message(Message::Binary(vec![1, 2, 3])), None);
        assert_eq!(
            from_message(Message::Text("{}".to_string())),
            Some(WireMessage::Text("{}".to_string()))
        );
    }

    #[test]
    fn close_maps_to_close_frame() {
        assert!(matches!(to_message(WireMessage::Close), Message::Close(None)));
        assert_eq!(from_message(Message::Close(None)), Some(WireMessage::Close));
    }
}
