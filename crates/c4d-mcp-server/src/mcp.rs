//! MCP protocol handling

use c4d_mcp_core::BridgeError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol revisions this server speaks, newest first
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// MCP JSON-RPC request or notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    /// Absent for notifications
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// Request ID (can be string or number)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::String(s) => f.write_str(s),
        }
    }
}

/// MCP JSON-RPC response
///
/// `id` is null only when the request could not be parsed far enough to
/// read its id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn success(id: Option<RequestId>, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<RequestId>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Error response carrying the bridge error's kind in `data.kind`
    pub fn bridge_error(id: Option<RequestId>, err: &BridgeError) -> Self {
        let mut response = Self::error(id, err.rpc_code(), err.to_string());
        if let Some(error) = response.error.as_mut() {
            error.data = Some(serde_json::json!({ "kind": err.kind().as_str() }));
        }
        response
    }
}

/// MCP initialize params
///
/// Everything is optional; clients differ in what they send.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(default)]
    pub capabilities: serde_json::Value,
    #[serde(default)]
    pub client_info: Option<ClientInfo>,
}

/// Client info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

/// MCP initialize result
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: ServerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

/// Server capabilities
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    pub tools: ToolsCapability,
}

/// Tools capability
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    pub list_changed: bool,
}

/// Server info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
}

/// Pick the protocol revision to answer `initialize` with
///
/// A supported requested revision is echoed back; anything else gets the
/// newest revision we speak.
pub fn negotiate_protocol_version(requested: Option<&str>) -> &'static str {
    requested
        .and_then(|wanted| {
            SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .copied()
                .find(|supported| *supported == wanted)
        })
        .unwrap_or(SUPPORTED_PROTOCOL_VERSIONS[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_notification_has_no_id() {
        let request: Request =
            serde_json::from_value(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
                .unwrap();
        assert!(request.is_notification());

        let request: Request = serde_json::from_value(
            json!({"jsonrpc": "2.0", "id": "abc", "method": "tools/list"}),
        )
        .unwrap();
        assert_eq!(request.id, Some(RequestId::String("abc".into())));
    }

    #[test]
    fn test_bridge_error_carries_kind() {
        let response = Response::bridge_error(
            Some(RequestId::Number(4)),
            &BridgeError::Application {
                code: 3,
                message: "No active document".into(),
            },
        );
        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["id"], 4);
        assert_eq!(value["error"]["message"], "Cinema 4D error 3: No active document");
        assert_eq!(value["error"]["data"]["kind"], "ApplicationError");
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_parse_error_response_has_null_id() {
        let value = serde_json::to_value(Response::error(None, -32700, "Parse error")).unwrap();
        assert_eq!(value["id"], serde_json::Value::Null);
    }

    #[test]
    fn test_negotiate_protocol_version() {
        assert_eq!(negotiate_protocol_version(Some("2024-11-05")), "2024-11-05");
        assert_eq!(negotiate_protocol_version(Some("1999-01-01")), SUPPORTED_PROTOCOL_VERSIONS[0]);
        assert_eq!(negotiate_protocol_version(None), SUPPORTED_PROTOCOL_VERSIONS[0]);
    }
}
