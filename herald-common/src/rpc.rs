//! Command envelope shared by every transport
//!
//! Inbound: `{"method": "...", "params": {...}}`.
//! Outbound: `{"success": bool, "message": "...", "data": {...}}`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const METHOD_SET_PLAY_BILL: &str = "setPlayBill";
pub const METHOD_START: &str = "start";
pub const METHOD_STOP: &str = "stop";
pub const METHOD_ENABLE: &str = "enable";
pub const METHOD_PAUSE: &str = "pause";
pub const METHOD_RESUME: &str = "resume";
pub const METHOD_RESET: &str = "reset";
pub const METHOD_SET_VOLUME: &str = "setVolume";
pub const METHOD_TEMP_PLAY: &str = "tempPlay";
pub const METHOD_TEMP_PLAY_INNER: &str = "tempPlayInner";

/// A decoded inbound request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub method: String,

    #[serde(default)]
    pub params: Map<String, Value>,
}

impl Command {
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            method: method.into(),
            params,
        }
    }

    /// Decode a command payload
    ///
    /// Upstream senders sometimes quote with `'`; those are normalised to `"`
    /// before parsing.
    pub fn parse(payload: &str) -> Result<Self> {
        let normalised = payload.replace('\'', "\"");
        serde_json::from_str(&normalised)
            .map_err(|e| Error::InvalidInput(format!("malformed command: {}", e)))
    }

    /// The whole params object as a JSON value
    pub fn params_value(&self) -> Value {
        Value::Object(self.params.clone())
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Integer parameter; numeric strings are accepted too
    pub fn int_param(&self, key: &str) -> Option<i64> {
        match self.params.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn require_int(&self, key: &str) -> Result<i64> {
        self.int_param(key).ok_or_else(|| {
            Error::InvalidInput(format!("parameter '{}' is missing or not an integer", key))
        })
    }
}

/// Response returned for every command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcResponse {
    pub success: bool,

    #[serde(default)]
    pub message: String,

    #[serde(default)]
    pub data: Value,
}

impl RpcResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: String::new(),
            data: Value::Object(Map::new()),
        }
    }

    pub fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Value::Object(Map::new()),
        }
    }
}
