//! MCP protocol types (JSON-RPC 2.0)
//!
//! Defines the wire format for MCP communication.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// JSON-RPC request
#[derive(Debug, Serialize)]
pub struct McpRequest {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpRequest {
    pub fn new(id: i64, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification (no id, no response)
#[derive(Debug, Serialize)]
pub struct McpNotification {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl McpNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
        }
    }
}

/// Reply to a request the peer sent us
#[derive(Debug, Serialize)]
pub struct McpReply {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<McpError>,
}

/// Any incoming message: a response, a notification or a peer request
#[derive(Debug, Deserialize)]
pub struct McpResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<McpError>,
    #[serde(default)]
    pub method: Option<String>,
}

impl McpResponse {
    /// Numeric correlation id of a response
    pub fn response_id(&self) -> Option<i64> {
        if self.method.is_some() {
            return None;
        }
        self.id.as_ref().and_then(Value::as_i64)
    }
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Initialize request params
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    pub capabilities: Value,
    pub client_info: ClientInfo,
}

/// Client info
#[derive(Debug, Serialize)]
pub struct ClientInfo {
    pub name: String,
    pub version: String,
}

/// Initialize response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

/// Server capabilities
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerCapabilities {
    #[serde(default)]
    pub tools: Option<Value>,
    #[serde(default)]
    pub resources: Option<Value>,
}

/// Peer identity reported during the handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Tool definition from tools/list
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<Value>,
}

/// Tools list response
#[derive(Debug, Deserialize)]
pub struct ToolsListResult {
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// Resource entry from resources/list
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Resources list response
#[derive(Debug, Deserialize)]
pub struct ResourcesListResult {
    #[serde(default)]
    pub resources: Vec<ResourceDescriptor>,
}

/// Tool call params
#[derive(Debug, Serialize)]
pub struct ToolCallParams {
    pub name: String,
    pub arguments: Value,
}

/// Tool call result (from server)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ToolContent>,
    #[serde(default)]
    pub is_error: bool,
}

/// One content block of a tool result
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    Text {
        text: String,
    },
    /// Image or audio payload, base64 encoded
    Binary {
        kind: String,
        data: String,
        mime_type: String,
    },
    /// Embedded resource or resource link
    Resource {
        uri: Option<String>,
        text: Option<String>,
    },
    Unknown {
        raw: Value,
    },
}

impl<'de> Deserialize<'de> for ToolContent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Ok(ToolContent::from_value(raw))
    }
}

impl ToolContent {
    /// Classify a raw content block; anything unrecognised is kept verbatim
    pub fn from_value(raw: Value) -> Self {
        let str_field = |v: &Value, key: &str| v.get(key).and_then(Value::as_str).map(String::from);

        match raw.get("type").and_then(Value::as_str) {
            Some("text") => match str_field(&raw, "text") {
                Some(text) => ToolContent::Text { text },
                None => ToolContent::Unknown { raw },
            },
            Some(kind @ ("image" | "audio")) => ToolContent::Binary {
                kind: kind.to_string(),
                data: str_field(&raw, "data").unwrap_or_default(),
                mime_type: str_field(&raw, "mimeType")
                    .unwrap_or_else(|| "application/octet-stream".to_string()),
            },
            Some("resource") => {
                let inner = raw.get("resource").unwrap_or(&raw);
                ToolContent::Resource {
                    uri: str_field(inner, "uri"),
                    text: str_field(inner, "text"),
                }
            }
            Some("resource_link") => ToolContent::Resource {
                uri: str_field(&raw, "uri"),
                text: None,
            },
            _ => ToolContent::Unknown { raw },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ToolContent::Text { text } => Some(text),
            _ => None,
        }
    }
}

impl std::fmt::Display for ToolContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolContent::Text { text } => write!(f, "{}", text),
            ToolContent::Binary { kind, mime_type, .. } if kind == "audio" => {
                write!(f, "[Audio: {}]", mime_type)
            }
            ToolContent::Binary { mime_type, .. } => write!(f, "[Image: {}]", mime_type),
            ToolContent::Resource { uri, .. } => {
                write!(f, "[Resource: {}]", uri.as_deref().unwrap_or("unknown"))
            }
            ToolContent::Unknown { raw } => write!(f, "{}", raw),
        }
    }
}

/// Outcome of a tool call as seen by the caller.
///
/// Errors the peer reports (JSON-RPC errors or `isError`) land here with
/// `success = false`; only transport faults are returned as `Err`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolResult {
    pub success: bool,
    pub content: Vec<ToolContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            success: true,
            content: vec![ToolContent::Text { text: text.into() }],
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            content: Vec::new(),
            error: Some(error.into()),
        }
    }

    /// Text blocks joined with newlines
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(ToolContent::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<ToolCallResult> for ToolResult {
    fn from(result: ToolCallResult) -> Self {
        let mut out = Self {
            success: !result.is_error,
            content: result.content,
            error: None,
        };
        if result.is_error {
            let text = out.joined_text();
            out.error = Some(if text.is_empty() {
                "Tool reported an error".to_string()
            } else {
                text
            });
        }
        out
    }
}

/// Resource read params
#[derive(Debug, Serialize)]
pub struct ResourceReadParams {
    pub uri: String,
}

/// One item of a resources/read response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceContent {
    #[serde(rename_all = "camelCase")]
    Text {
        uri: String,
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Blob {
        uri: String,
        blob: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
}

/// Resource read response
#[derive(Debug, Deserialize)]
pub struct ResourceReadResult {
    #[serde(default)]
    pub contents: Vec<ResourceContent>,
}

/// Outcome of a resource read
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceResult {
    pub success: bool,
    pub contents: Vec<ResourceContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
