//! Gateway WebSocket protocol types: the four frame kinds and the connect handshake.

use crate::config::ClientConfig;
use crate::error::GatewayError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One JSON text message on the socket, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Frame {
    Req(RequestFrame),
    Res(ResponseFrame),
    Event(EventFrame),
    /// Compact event whose payload arrives pre-serialized in `payloadJSON`.
    Evt(CompactEventFrame),
}

/// Wire request: `{ "type": "req", "id", "method", "params"? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Wire response: `{ "type": "res", "id", "ok", "payload"? , "error"? }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

/// `res.error`: structured `{code, message, details?}`, or a bare string from older gateways.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ErrorBody {
    Shape(ErrorShape),
    Message(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorShape {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactEventFrame {
    pub event: String,
    #[serde(rename = "payloadJSON", default, skip_serializing_if = "Option::is_none")]
    pub payload_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
}

/// Decode one text message. Malformed JSON and unknown shapes yield `None`.
pub fn decode_frame(text: &str) -> Option<Frame> {
    match serde_json::from_str(text) {
        Ok(frame) => Some(frame),
        Err(e) => {
            log::debug!("dropping undecodable frame: {}", e);
            None
        }
    }
}

pub fn encode_frame(frame: &Frame) -> Result<String, GatewayError> {
    Ok(serde_json::to_string(frame)?)
}

impl RequestFrame {
    pub fn new(id: impl Into<String>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

impl ResponseFrame {
    pub fn ok(id: impl Into<String>, payload: Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(ErrorBody::Shape(ErrorShape {
                code: code.into(),
                message: message.into(),
                details: None,
            })),
        }
    }

    /// Payload on success (`null` when absent), the gateway's error otherwise.
    pub fn into_result(self) -> Result<Value, GatewayError> {
        if self.ok {
            return Ok(self.payload.unwrap_or(Value::Null));
        }
        Err(match self.error {
            Some(ErrorBody::Shape(shape)) => GatewayError::Remote {
                code: if shape.code.is_empty() {
                    "error".to_string()
                } else {
                    shape.code
                },
                message: shape.message,
                details: shape.details,
            },
            Some(ErrorBody::Message(message)) => GatewayError::Remote {
                code: "error".to_string(),
                message,
                details: None,
            },
            None => GatewayError::Remote {
                code: "error".to_string(),
                message: "request failed".to_string(),
                details: None,
            },
        })
    }
}

/// Server-pushed event as delivered to listeners. Compact payloads are parsed on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayEvent {
    pub event: String,
    pub seq: Option<u64>,
    payload: EventPayload,
}

#[derive(Debug, Clone, PartialEq)]
enum EventPayload {
    Empty,
    Value(Value),
    Json(String),
}

impl From<EventFrame> for GatewayEvent {
    fn from(f: EventFrame) -> Self {
        Self {
            event: f.event,
            seq: f.seq,
            payload: f.payload.map_or(EventPayload::Empty, EventPayload::Value),
        }
    }
}

impl From<CompactEventFrame> for GatewayEvent {
    fn from(f: CompactEventFrame) -> Self {
        Self {
            event: f.event,
            seq: f.seq,
            payload: f.payload_json.map_or(EventPayload::Empty, EventPayload::Json),
        }
    }
}

impl GatewayEvent {
    pub fn new(event: impl Into<String>, payload: Option<Value>) -> Self {
        Self {
            event: event.into(),
            seq: None,
            payload: payload.map_or(EventPayload::Empty, EventPayload::Value),
        }
    }

    /// Payload as JSON. `None` when absent or when the compact payload is not valid JSON.
    pub fn payload(&self) -> Option<Value> {
        match &self.payload {
            EventPayload::Empty => None,
            EventPayload::Value(v) => Some(v.clone()),
            EventPayload::Json(s) => serde_json::from_str(s).ok(),
        }
    }

    /// Decode the payload into `T`; an absent payload decodes from `null`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, GatewayError> {
        Ok(match &self.payload {
            EventPayload::Empty => serde_json::from_value(Value::Null)?,
            EventPayload::Value(v) => T::deserialize(v)?,
            EventPayload::Json(s) => serde_json::from_str(s)?,
        })
    }

    /// Pre-serialized payload text of an `evt` frame, untouched.
    pub fn raw_payload_json(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::Json(s) => Some(s),
            _ => None,
        }
    }
}

/// Params of the `connect` request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub min_protocol: u32,
    pub max_protocol: u32,
    pub client: ConnectClient,
    pub role: String,
    pub scopes: Vec<String>,
    pub auth: ConnectAuth,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectClient {
    pub id: String,
    pub display_name: String,
    pub version: String,
    pub platform: String,
    pub mode: String,
    /// Fresh per client instance, so the gateway can tell restarts apart.
    pub instance_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectAuth {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ConnectParams {
    pub fn from_config(config: &ClientConfig, instance_id: &str) -> Self {
        Self {
            min_protocol: config.min_protocol,
            max_protocol: config.max_protocol,
            client: ConnectClient {
                id: config.client.id.clone(),
                display_name: config.client.display_name.clone(),
                version: config.client.version.clone(),
                platform: config.client.platform.clone(),
                mode: config.client.mode.clone(),
                instance_id: instance_id.to_string(),
            },
            role: config.role.clone(),
            scopes: config.scopes.clone(),
            auth: ConnectAuth {
                token: config.token().map(str::to_string),
                password: config.password().map(str::to_string),
            },
        }
    }
}

/// Server hello-ok payload after a successful connect. Every field is optional; any
/// `ok: true` response to connect counts as success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloOk {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<HelloPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<HelloAuth>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPolicy {
    pub tick_interval_ms: Option<u64>,
}

/// Role and scopes granted by the gateway.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloAuth {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl HelloOk {
    /// Lenient parse of a connect payload; unexpected shapes give an empty hello.
    pub fn from_payload(payload: &Value) -> Self {
        Self::deserialize(payload).unwrap_or_default()
    }
}
