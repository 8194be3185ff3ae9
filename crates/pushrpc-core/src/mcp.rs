//! Model Context Protocol session layer.
//!
//! Runs the MCP handshake over an `SseTransport` and exposes the two tool
//! operations a client needs. Tool names and arguments stay opaque.

use crate::transport::SseTransport;
use crate::{Result, TransportError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{info, warn};

/// MCP protocol revision sent in `initialize`.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// Name and version announced to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl Default for ClientInfo {
    fn default() -> Self {
        Self::new("pushrpc", env!("CARGO_PKG_VERSION"))
    }
}

/// Server answer to `initialize`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub server_info: Option<Value>,
}

/// A tool advertised by `tools/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// One item of a tool result's `content` array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Fields of non-text items (images, resources).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContentItem {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: Some(text.into()),
            extra: Map::new(),
        }
    }
}

/// Result of `tools/call`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentItem>,
    #[serde(default)]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Parse a `tools/call` result. A bare string is accepted as a single
    /// text item.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::String(text) => Ok(Self {
                content: vec![ContentItem::text(text)],
                is_error: false,
            }),
            Value::Object(_) => serde_json::from_value(value).map_err(|e| TransportError::Json {
                message: format!("invalid tools/call result: {}", e),
                source: Some(e),
            }),
            other => Err(TransportError::Json {
                message: format!("unexpected tools/call result: {}", other),
                source: None,
            }),
        }
    }

    /// The text of every content item, one per line. Non-text items
    /// contribute empty lines.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .map(|item| item.text.as_deref().unwrap_or_default())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// MCP client over a push-channel transport.
pub struct McpClient {
    transport: SseTransport,
    client_info: ClientInfo,
}

impl McpClient {
    pub fn new(transport: SseTransport) -> Self {
        Self {
            transport,
            client_info: ClientInfo::default(),
        }
    }

    pub fn with_client_info(mut self, client_info: ClientInfo) -> Self {
        self.client_info = client_info;
        self
    }

    pub fn transport(&self) -> &SseTransport {
        &self.transport
    }

    /// Connect the transport and run the MCP handshake.
    ///
    /// If `initialize` fails the transport is disconnected again.
    pub async fn connect(&self) -> Result<InitializeResult> {
        self.transport.connect().await?;

        let params = json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": self.client_info,
        });

        let result = match self.transport.call("initialize", params).await {
            Ok(value) => value,
            Err(e) => {
                warn!("MCP initialize failed: {}", e);
                self.transport.disconnect();
                return Err(e);
            }
        };

        // Servers differ in how much of the result they fill in
        let init: InitializeResult = serde_json::from_value(result).unwrap_or_default();
        info!(
            "MCP session initialized (protocol {})",
            init.protocol_version.as_deref().unwrap_or("unknown")
        );

        self.transport
            .notify("notifications/initialized", json!({}))
            .await?;

        Ok(init)
    }

    pub fn disconnect(&self) {
        self.transport.disconnect();
    }

    /// List the tools the server offers.
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.transport.call("tools/list", json!({})).await?;

        match result.get("tools") {
            Some(tools) => serde_json::from_value(tools.clone()).map_err(|e| TransportError::Json {
                message: format!("invalid tools/list result: {}", e),
                source: Some(e),
            }),
            None => Ok(Vec::new()),
        }
    }

    /// Call a tool by name.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let params = json!({ "name": name, "arguments": arguments });
        let result = self.transport.call("tools/call", params).await?;
        ToolCallResult::from_value(result)
    }
}
