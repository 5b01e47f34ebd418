//! Rebuildable client handle for composition roots that need to swap credentials at runtime.

use super::client::GatewayClient;
use super::events::{EventListeners, Subscription};
use super::protocol::GatewayEvent;
use crate::config::ClientConfig;
use crate::error::GatewayResult;
use crate::transport::{Connector, WsConnector};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type ConfigProvider = Arc<dyn Fn() -> GatewayResult<ClientConfig> + Send + Sync>;

/// Owns at most one [`GatewayClient`], built on first use from the config provider.
/// Event listeners belong to the hub, so they keep receiving events across `reconnect()`.
pub struct GatewayHub {
    provider: ConfigProvider,
    connector: Arc<dyn Connector>,
    listeners: Arc<EventListeners>,
    current: Mutex<Option<GatewayClient>>,
}

impl GatewayHub {
    /// Hub that re-reads `CLAWDBOT_GATEWAY_*` every time it builds a client.
    pub fn from_env() -> Self {
        Self::new(|| Ok(ClientConfig::from_env()), WsConnector)
    }

    pub fn new<F>(provider: F, connector: impl Connector) -> Self
    where
        F: Fn() -> GatewayResult<ClientConfig> + Send + Sync + 'static,
    {
        Self {
            provider: Arc::new(provider),
            connector: Arc::new(connector),
            listeners: EventListeners::new(),
            current: Mutex::new(None),
        }
    }

    /// The current client, building one if there is none or the last one was shut down.
    pub async fn client(&self) -> GatewayResult<GatewayClient> {
        let mut current = self.current.lock().await;
        if let Some(client) = current.as_ref() {
            if !client.is_shut_down() {
                return Ok(client.clone());
            }
        }
        let client = self.build()?;
        *current = Some(client.clone());
        Ok(client)
    }

    fn build(&self) -> GatewayResult<GatewayClient> {
        let config = (self.provider)()?;
        log::debug!("building gateway client for {}", config.url);
        GatewayClient::with_parts(config, self.connector.clone(), self.listeners.clone())
    }

    pub async fn request<T, P>(&self, method: &str, params: P) -> GatewayResult<T>
    where
        T: DeserializeOwned,
        P: Serialize,
    {
        let client = self.client().await?;
        client.request(method, params).await
    }

    pub async fn ensure_connected(&self) -> GatewayResult<()> {
        self.client().await?.ensure_connected().await
    }

    pub fn on_event<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&GatewayEvent) + Send + Sync + 'static,
    {
        self.listeners.add(handler)
    }

    /// Shut down the current client (failing its pending calls with `ShutDown`) and build a
    /// fresh one from newly read config.
    pub async fn reconnect(&self) -> GatewayResult<GatewayClient> {
        let mut current = self.current.lock().await;
        if let Some(old) = current.take() {
            old.shutdown().await;
        }
        let client = self.build()?;
        *current = Some(client.clone());
        log::info!("gateway client rebuilt");
        Ok(client)
    }

    /// Shut down the current client. The next call builds a new one.
    pub async fn shutdown(&self) {
        let old = self.current.lock().await.take();
        if let Some(old) = old {
            old.shutdown().await;
        }
    }
}
