//! Client configuration: gateway URL, credentials, client identity, and timings.
//!
//! Config can come from a JSON file (e.g. `~/.gatelink/config.json`) and environment.
//! Environment variables override file values. Validation happens when a client is built,
//! so a missing credential is reported to the first caller rather than at load time.

use crate::error::GatewayError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_GATEWAY_URL: &str = "ws://127.0.0.1:18789";

/// Protocol version this client speaks.
pub const PROTOCOL_VERSION: u32 = 3;

pub const ENV_GATEWAY_URL: &str = "CLAWDBOT_GATEWAY_URL";
pub const ENV_GATEWAY_TOKEN: &str = "CLAWDBOT_GATEWAY_TOKEN";
pub const ENV_GATEWAY_PASSWORD: &str = "CLAWDBOT_GATEWAY_PASSWORD";

/// Top-level client config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// WebSocket URL of the gateway (default `ws://127.0.0.1:18789`).
    #[serde(default = "default_url")]
    pub url: String,

    /// Shared-secret credentials sent with connect. At least one must be set.
    #[serde(default)]
    pub auth: AuthConfig,

    /// How this client describes itself in the handshake.
    #[serde(default)]
    pub client: ClientIdentity,

    #[serde(default = "default_role")]
    pub role: String,

    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    #[serde(default = "default_protocol")]
    pub min_protocol: u32,

    #[serde(default = "default_protocol")]
    pub max_protocol: u32,

    #[serde(default)]
    pub timing: TimingConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Overridden by CLAWDBOT_GATEWAY_TOKEN.
    pub token: Option<String>,
    /// Overridden by CLAWDBOT_GATEWAY_PASSWORD.
    pub password: Option<String>,
}

impl AuthConfig {
    pub fn is_configured(&self) -> bool {
        non_empty(self.token.as_deref()).is_some() || non_empty(self.password.as_deref()).is_some()
    }
}

/// Client descriptor sent in `connect.params.client`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    /// Stable client id (e.g. "gatelink-cli").
    pub id: String,
    pub display_name: String,
    pub version: String,
    pub platform: String,
    /// Operating mode, e.g. "operator" or "backend".
    pub mode: String,
}

impl Default for ClientIdentity {
    fn default() -> Self {
        Self {
            id: "gatelink".to_string(),
            display_name: "Gatelink".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            platform: std::env::consts::OS.to_string(),
            mode: "backend".to_string(),
        }
    }
}

/// Timeouts and retry schedule. All values in milliseconds on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingConfig {
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Extra connect attempts inside one establishment before giving up to the reconnect loop.
    #[serde(default = "default_handshake_retries")]
    pub handshake_retries: u32,
    /// Delay before retry n is `handshakeRetryDelayMs * n`.
    #[serde(default = "default_handshake_retry_delay_ms")]
    pub handshake_retry_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Must be shorter than the heartbeat interval.
    #[serde(default = "default_pong_timeout_ms")]
    pub pong_timeout_ms: u64,
    /// Fixed leading reconnect delays; later attempts double the last entry.
    #[serde(default = "default_backoff_schedule_ms")]
    pub backoff_schedule_ms: Vec<u64>,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
    /// Upper bound on the graceful close during shutdown.
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
}

fn default_url() -> String {
    DEFAULT_GATEWAY_URL.to_string()
}

fn default_role() -> String {
    "operator".to_string()
}

fn default_scopes() -> Vec<String> {
    vec!["operator.admin".to_string()]
}

fn default_protocol() -> u32 {
    PROTOCOL_VERSION
}

fn default_handshake_timeout_ms() -> u64 {
    15_000
}

fn default_handshake_retries() -> u32 {
    2
}

fn default_handshake_retry_delay_ms() -> u64 {
    500
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_pong_timeout_ms() -> u64 {
    20_000
}

fn default_backoff_schedule_ms() -> Vec<u64> {
    vec![1_000, 2_000, 4_000]
}

fn default_backoff_max_ms() -> u64 {
    30_000
}

fn default_close_timeout_ms() -> u64 {
    1_000
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_ms: default_handshake_timeout_ms(),
            handshake_retries: default_handshake_retries(),
            handshake_retry_delay_ms: default_handshake_retry_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            pong_timeout_ms: default_pong_timeout_ms(),
            backoff_schedule_ms: default_backoff_schedule_ms(),
            backoff_max_ms: default_backoff_max_ms(),
            close_timeout_ms: default_close_timeout_ms(),
        }
    }
}

impl TimingConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn handshake_retry_delay(&self) -> Duration {
        Duration::from_millis(self.handshake_retry_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms)
    }

    pub fn backoff_schedule(&self) -> Vec<Duration> {
        self.backoff_schedule_ms
            .iter()
            .copied()
            .map(Duration::from_millis)
            .collect()
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    fn validate(&self) -> Result<(), String> {
        if self.handshake_timeout_ms == 0 {
            return Err("handshakeTimeoutMs must be > 0".to_string());
        }
        if self.heartbeat_interval_ms == 0 {
            return Err("heartbeatIntervalMs must be > 0".to_string());
        }
        if self.pong_timeout_ms == 0 || self.pong_timeout_ms >= self.heartbeat_interval_ms {
            return Err("pongTimeoutMs must be > 0 and shorter than heartbeatIntervalMs".to_string());
        }
        let Some(&last) = self.backoff_schedule_ms.last() else {
            return Err("backoffScheduleMs must not be empty".to_string());
        };
        if self.backoff_schedule_ms.iter().any(|&d| d == 0) {
            return Err("backoffScheduleMs entries must be > 0".to_string());
        }
        if self.backoff_max_ms < last {
            return Err("backoffMaxMs must be >= the last backoffScheduleMs entry".to_string());
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            auth: AuthConfig::default(),
            client: ClientIdentity::default(),
            role: default_role(),
            scopes: default_scopes(),
            min_protocol: default_protocol(),
            max_protocol: default_protocol(),
            timing: TimingConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Defaults plus environment overrides. Never fails; see [`ClientConfig::validate`].
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Override url and credentials from CLAWDBOT_GATEWAY_* when set and non-empty.
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            env_var(ENV_GATEWAY_URL),
            env_var(ENV_GATEWAY_TOKEN),
            env_var(ENV_GATEWAY_PASSWORD),
        );
    }

    fn apply_overrides(
        &mut self,
        url: Option<String>,
        token: Option<String>,
        password: Option<String>,
    ) {
        if let Some(u) = url {
            self.url = u;
        }
        if let Some(t) = token {
            self.auth.token = Some(t);
        }
        if let Some(p) = password {
            self.auth.password = Some(p);
        }
    }

    /// Fails when no credential is configured or timings are unusable.
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.url.trim().is_empty() {
            return Err(GatewayError::config("gateway url is empty"));
        }
        if !self.auth.is_configured() {
            return Err(GatewayError::config(format!(
                "gateway credentials missing (set {} or {})",
                ENV_GATEWAY_TOKEN, ENV_GATEWAY_PASSWORD
            )));
        }
        if self.min_protocol > self.max_protocol {
            return Err(GatewayError::config("minProtocol is greater than maxProtocol"));
        }
        self.timing.validate().map_err(GatewayError::Config)
    }

    /// Trimmed token, if any.
    pub fn token(&self) -> Option<&str> {
        non_empty(self.auth.token.as_deref())
    }

    /// Trimmed password, if any.
    pub fn password(&self) -> Option<&str> {
        non_empty(self.auth.password.as_deref())
    }
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("GATELINK_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".gatelink").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => defaults.
/// Environment overrides are applied on top. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(ClientConfig, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let mut config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        ClientConfig::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    config.apply_env();
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_token() -> ClientConfig {
        let mut config = ClientConfig::default();
        config.auth.token = Some("abc".to_string());
        config
    }

    #[test]
    fn defaults() {
        let c = ClientConfig::default();
        assert_eq!(c.url, "ws://127.0.0.1:18789");
        assert_eq!(c.timing.heartbeat_interval(), Duration::from_secs(30));
        assert_eq!(c.timing.pong_timeout(), Duration::from_secs(20));
        assert_eq!(c.timing.handshake_timeout(), Duration::from_secs(15));
        assert_eq!(c.timing.handshake_retries, 2);
    }

    #[test]
    fn missing_credentials_is_a_config_error() {
        let err = ClientConfig::default().validate().unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));

        let mut blank = ClientConfig::default();
        blank.auth.token = Some("   ".to_string());
        assert!(blank.validate().is_err());
    }

    #[test]
    fn password_alone_is_enough() {
        let mut config = ClientConfig::default();
        config.auth.password = Some("hunter2".to_string());
        assert!(config.validate().is_ok());
        assert_eq!(config.password(), Some("hunter2"));
        assert_eq!(config.token(), None);
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = with_token();
        config.apply_overrides(Some("ws://gw:1".to_string()), Some("xyz".to_string()), None);
        assert_eq!(config.url, "ws://gw:1");
        assert_eq!(config.token(), Some("xyz"));
        assert!(config.auth.password.is_none());
    }

    #[test]
    fn pong_timeout_must_be_shorter_than_interval() {
        let mut config = with_token();
        config.timing.pong_timeout_ms = config.timing.heartbeat_interval_ms;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backoff_cap_must_cover_schedule() {
        let mut config = with_token();
        config.timing.backoff_max_ms = 500;
        assert!(config.validate().is_err());
        config.timing.backoff_max_ms = 30_000;
        config.timing.backoff_schedule_ms.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn parses_partial_json() {
        let config: ClientConfig = serde_json::from_str(
            r#"{ "url": "ws://10.0.0.2:18789", "auth": { "token": "t" }, "timing": { "heartbeatIntervalMs": 5000, "pongTimeoutMs": 2000 } }"#,
        )
        .unwrap();
        assert_eq!(config.url, "ws://10.0.0.2:18789");
        assert_eq!(config.timing.heartbeat_interval_ms, 5000);
        assert_eq!(config.timing.backoff_max_ms, 30_000);
        assert_eq!(config.role, "operator");
        assert!(config.validate().is_ok());
    }
}
