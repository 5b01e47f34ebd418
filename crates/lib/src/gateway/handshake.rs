//! Connect handshake: open a socket, send `connect`, wait for the matching `res`.
//!
//! One establishment makes up to `1 + handshakeRetries` attempts, sleeping
//! `handshakeRetryDelayMs * n` before retry n. That absorbs the window where the socket
//! opens before the gateway is ready. After that the failure goes to the reconnect loop.

use super::connection::ConnectionState;
use super::protocol::{decode_frame, encode_frame, ConnectParams, Frame, HelloOk, RequestFrame};
use crate::config::ClientConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::transport::{Connector, Socket, WireMessage};
use std::sync::Arc;
use std::time::Duration;

/// An authenticated socket plus what the gateway said in hello-ok.
pub(crate) struct Established {
    pub socket: Socket,
    pub hello: HelloOk,
}

pub(crate) async fn establish<F>(
    connector: Arc<dyn Connector>,
    config: Arc<ClientConfig>,
    params: ConnectParams,
    progress: F,
) -> GatewayResult<Established>
where
    F: Fn(ConnectionState) + Send + Sync,
{
    let retries = config.timing.handshake_retries;
    let mut attempt = 0u32;
    loop {
        progress(ConnectionState::Connecting);
        match connect_once(connector.as_ref(), &config, &params, &progress).await {
            Ok(established) => return Ok(established),
            Err(e) if attempt < retries => {
                attempt += 1;
                let delay = config.timing.handshake_retry_delay() * attempt;
                log::warn!(
                    "gateway connect attempt {} failed: {}; retrying in {}ms",
                    attempt,
                    e,
                    delay.as_millis()
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

async fn connect_once<F>(
    connector: &dyn Connector,
    config: &ClientConfig,
    params: &ConnectParams,
    progress: &F,
) -> GatewayResult<Established>
where
    F: Fn(ConnectionState) + Send + Sync,
{
    let mut socket = connector
        .connect(&config.url)
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))?;
    progress(ConnectionState::Handshaking);

    let id = uuid::Uuid::new_v4().to_string();
    let frame = Frame::Req(RequestFrame::new(
        id.clone(),
        "connect",
        Some(serde_json::to_value(params)?),
    ));
    let text = encode_frame(&frame)?;
    if let Err(e) = socket.send_text(text).await {
        close_quietly(&mut socket, config.timing.close_timeout()).await;
        return Err(GatewayError::Send(e.to_string()));
    }

    let timeout = config.timing.handshake_timeout();
    let result = match tokio::time::timeout(timeout, await_hello(&mut socket, &id)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::handshake_timeout(timeout)),
    };
    match result {
        Ok(hello) => Ok(Established { socket, hello }),
        Err(e) => {
            close_quietly(&mut socket, config.timing.close_timeout()).await;
            Err(e)
        }
    }
}

async fn await_hello(socket: &mut Socket, id: &str) -> GatewayResult<HelloOk> {
    while let Some(msg) = socket.recv().await {
        let msg = msg.map_err(|e| GatewayError::disconnected(e.to_string()))?;
        match msg {
            WireMessage::Text(text) => match decode_frame(&text) {
                Some(Frame::Res(res)) if res.id == id => {
                    return match res.into_result() {
                        Ok(payload) => Ok(HelloOk::from_payload(&payload)),
                        Err(GatewayError::Remote { code, message, .. }) => {
                            Err(GatewayError::handshake(format!("{}: {}", code, message)))
                        }
                        Err(e) => Err(e),
                    };
                }
                Some(Frame::Event(ev)) => {
                    log::debug!("event before handshake completed: {}", ev.event);
                }
                Some(Frame::Evt(ev)) => {
                    log::debug!("event before handshake completed: {}", ev.event);
                }
                Some(_) | None => {}
            },
            WireMessage::Ping(_) | WireMessage::Pong(_) => {}
            WireMessage::Close => break,
        }
    }
    Err(GatewayError::disconnected(
        "gateway closed the connection during handshake",
    ))
}

pub(crate) async fn close_quietly(socket: &mut Socket, limit: Duration) {
    if tokio::time::timeout(limit, socket.close()).await.is_err() {
        log::debug!("socket close timed out after {}ms", limit.as_millis());
    }
}
