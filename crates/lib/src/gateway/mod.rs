//! Gateway client: one WebSocket to the control plane, shared by every caller.
//!
//! First frame on a new socket is `connect`; the gateway answers with hello-ok. After that
//! the client sends `req` frames, matches `res` frames by id, and fans `event` frames out to
//! listeners. A dropped socket fails in-flight calls, keeps queued ones, and reconnects with
//! backoff.

mod client;
mod connection;
mod events;
mod handshake;
mod heartbeat;
mod hub;
mod pending;
pub mod protocol;

pub use client::{GatewayClient, PendingResponse, ResponseFuture};
pub use connection::ConnectionState;
pub use events::{EventHandler, EventListeners, Subscription};
pub use hub::{ConfigProvider, GatewayHub};
pub use protocol::{ConnectParams, GatewayEvent, HelloOk};
