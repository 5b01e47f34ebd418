//! Errors surfaced to callers of the gateway client.
//!
//! One failure (a dead socket, a shutdown) usually rejects many waiters at once, so the
//! error type is `Clone` and carries messages rather than source errors.

use std::time::Duration;
use thiserror::Error;

/// Result alias used across the client.
pub type GatewayResult<T> = Result<T, GatewayError>;

#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Missing credentials or unusable settings. Not retried.
    #[error("configuration error: {0}")]
    Config(String),

    /// The client was shut down; no further requests are accepted.
    #[error("client shut down")]
    ShutDown,

    /// The socket closed or failed while the request was in flight.
    #[error("gateway disconnected: {reason}")]
    Disconnected { reason: String },

    /// No pong arrived within the heartbeat timeout.
    #[error("ping timeout")]
    PingTimeout,

    /// The gateway rejected the connect request, or it did not answer in time.
    #[error("handshake failed: {reason}")]
    Handshake { reason: String },

    /// The socket could not be opened.
    #[error("transport error: {0}")]
    Transport(String),

    /// Writing a frame to the socket failed.
    #[error("send failed: {0}")]
    Send(String),

    /// The gateway answered the request with `ok: false`.
    #[error("gateway error {code}: {message}")]
    Remote {
        code: String,
        message: String,
        details: Option<serde_json::Value>,
    },

    /// Params could not be encoded, or a payload did not match the expected type.
    #[error("decode error: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn disconnected(reason: impl Into<String>) -> Self {
        Self::Disconnected {
            reason: reason.into(),
        }
    }

    pub fn handshake(reason: impl Into<String>) -> Self {
        Self::Handshake {
            reason: reason.into(),
        }
    }

    pub fn handshake_timeout(after: Duration) -> Self {
        Self::handshake(format!("no response to connect within {}ms", after.as_millis()))
    }

    /// True for application errors returned by the gateway for one specific request.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    /// True for failures of the shared connection; the reconnect loop recovers from these,
    /// so the same call may succeed if issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Disconnected { .. }
                | Self::PingTimeout
                | Self::Handshake { .. }
                | Self::Transport(_)
                | Self::Send(_)
        )
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        Self::Decode(e.to_string())
    }
}
