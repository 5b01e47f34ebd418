//! Gatelink: client transport for the Gateway control plane, used by the CLI and by any
//! process that talks to a running gateway.

pub mod backoff;
pub mod config;
pub mod error;
pub mod gateway;
pub mod transport;

pub use config::ClientConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{ConnectionState, GatewayClient, GatewayEvent, GatewayHub, Subscription};
