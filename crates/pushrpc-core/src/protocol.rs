//! JSON-RPC 2.0 wire types.
//!
//! Outgoing requests and notifications are POSTed to the submission endpoint;
//! incoming messages arrive either as the body of a `200` submission reply or
//! as the payload of a stream event.
//!
//! ```text
//! request:      {"jsonrpc":"2.0","id":7,"method":"tools/list","params":{}}
//! notification: {"jsonrpc":"2.0","method":"notifications/initialized","params":{}}
//! response:     {"jsonrpc":"2.0","id":7,"result":{...}}
//! error:        {"jsonrpc":"2.0","id":7,"error":{"code":-32601,"message":"..."}}
//! ```

use crate::{Result, TransportError};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// JSON-RPC 2.0 request expecting a reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub jsonrpc: String,
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    /// Create a new JSON-RPC 2.0 request.
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 notification (no `id`, no reply).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcNotification {
    pub jsonrpc: String,
    pub method: String,
    pub params: Value,
}

impl RpcNotification {
    /// Create a new JSON-RPC 2.0 notification.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC 2.0 error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcErrorObject {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Any JSON-RPC message received from the server.
///
/// Responses carry `id` plus `result` or `error`; server-initiated
/// notifications and requests carry `method`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jsonrpc: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    /// `Some(Value::Null)` when the server sent `"result": null`.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl RpcMessage {
    /// Parse a message from text. Only JSON objects are accepted.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| TransportError::MalformedStreamMessage {
                message: format!("invalid JSON: {}", e),
            })?;

        if !value.is_object() {
            return Err(TransportError::MalformedStreamMessage {
                message: "expected a JSON object".to_string(),
            });
        }

        serde_json::from_value(value).map_err(|e| TransportError::MalformedStreamMessage {
            message: format!("not a JSON-RPC message: {}", e),
        })
    }

    /// The numeric request id, if this message carries one.
    ///
    /// Only non-negative integer ids can match a pending request.
    pub fn request_id(&self) -> Option<u64> {
        self.id.as_ref().and_then(Value::as_u64)
    }

    /// Whether the far end originated this message (notification or request).
    pub fn is_server_initiated(&self) -> bool {
        self.method.is_some()
    }

    /// Convert a response into the outcome delivered to the waiting caller.
    pub fn into_outcome(self) -> RpcOutcome {
        match self.error {
            Some(error) => RpcOutcome::RemoteError(error),
            None => RpcOutcome::Success(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// How a submitted request was resolved.
///
/// Timeout and cancellation are values, not errors, so callers can tell
/// "the server said no" apart from "no answer arrived".
#[derive(Debug, Clone, PartialEq)]
pub enum RpcOutcome {
    /// The server returned a `result`.
    Success(Value),
    /// The server returned an `error` object.
    RemoteError(RpcErrorObject),
    /// No response arrived before the request deadline.
    TimedOut,
    /// The transport was torn down while the request was pending.
    Cancelled,
}

impl RpcOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RpcOutcome::Success(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RpcOutcome::TimedOut)
    }

    /// Convert into a plain result for request `id`.
    pub fn into_result(self, id: u64) -> Result<Value> {
        match self {
            RpcOutcome::Success(value) => Ok(value),
            RpcOutcome::RemoteError(error) => Err(TransportError::Remote {
                code: error.code,
                message: if error.message.is_empty() {
                    "remote error".to_string()
                } else {
                    error.message
                },
                data: error.data,
            }),
            RpcOutcome::TimedOut => Err(TransportError::RequestTimeout { id }),
            RpcOutcome::Cancelled => Err(TransportError::Cancelled { id }),
        }
    }

    /// Render the outcome as a JSON value for display.
    pub fn to_json(&self) -> Value {
        match self {
            RpcOutcome::Success(value) => serde_json::json!({ "result": value }),
            RpcOutcome::RemoteError(error) => serde_json::json!({ "error": error }),
            RpcOutcome::TimedOut => serde_json::json!({ "timeout": true }),
            RpcOutcome::Cancelled => serde_json::json!({ "cancelled": true }),
        }
    }
}
