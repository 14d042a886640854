//! Transport-independent MCP method handling
//!
//! Adapters hand every inbound JSON-RPC message to `McpService` and write
//! back whatever response it returns. Notifications produce no response.

use crate::mcp::{
    InitializeParams, InitializeResult, Request, RequestId, Response, ServerCapabilities,
    ServerInfo, ToolsCapability, negotiate_protocol_version,
};
use crate::router::RequestRouter;
use crate::tools::{call_result, list_tools};
use c4d_mcp_core::{Arguments, BridgeError, CallOrigin, ToolCallRequest, error_codes};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

const INSTRUCTIONS: &str = "Tools drive a running Cinema 4D instance through its socket plugin. \
Call get_scene_info or list_objects first to see what the scene contains.";

#[derive(Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

/// MCP protocol service shared by every transport
#[derive(Clone)]
pub struct McpService {
    router: RequestRouter,
    server_info: ServerInfo,
}

impl McpService {
    pub fn new(router: RequestRouter) -> Self {
        Self {
            router,
            server_info: ServerInfo {
                name: "cinema4d-mcp".into(),
                version: env!("CARGO_PKG_VERSION").into(),
            },
        }
    }

    pub fn router(&self) -> &RequestRouter {
        &self.router
    }

    /// Handle one raw JSON-RPC message as received on the wire
    pub async fn handle_message(&self, raw: &str, origin: &CallOrigin) -> Option<Response> {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => self.handle_value(value, origin).await,
            Err(e) => {
                warn!(%origin, "Failed to parse message: {}", e);
                Some(Response::error(
                    None,
                    error_codes::PARSE_ERROR,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    /// Handle one already-parsed JSON-RPC message
    pub async fn handle_value(&self, value: Value, origin: &CallOrigin) -> Option<Response> {
        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());

        match serde_json::from_value::<Request>(value) {
            Ok(request) => self.handle(request, origin).await,
            Err(e) => {
                warn!(%origin, "Invalid JSON-RPC message: {}", e);
                Some(Response::error(
                    id,
                    error_codes::INVALID_REQUEST,
                    format!("Invalid request: {}", e),
                ))
            }
        }
    }

    /// Handle one request; `None` for notifications
    pub async fn handle(&self, request: Request, origin: &CallOrigin) -> Option<Response> {
        if request.is_notification() {
            match request.method.as_str() {
                "notifications/initialized" | "initialized" => {
                    info!(%origin, "Client initialized")
                }
                "notifications/cancelled" => debug!(%origin, "Client cancelled a request"),
                other => debug!(%origin, "Ignoring notification {}", other),
            }
            return None;
        }

        debug!(%origin, "Received {}", request.method);
        let id = request.id.clone();
        let response = match request.method.as_str() {
            "initialize" => self.initialize(id, request.params),
            "ping" => Response::success(id, json!({})),
            "tools/list" => Response::success(id, json!({ "tools": list_tools() })),
            "tools/call" => self.call_tool(id, request.params, origin).await,
            // Legacy clients send this one with an id
            "initialized" | "notifications/initialized" => Response::success(id, json!({})),
            other => Response::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            ),
        };
        Some(response)
    }

    fn initialize(&self, id: Option<RequestId>, params: Value) -> Response {
        let params: InitializeParams = if params.is_null() {
            InitializeParams::default()
        } else {
            match serde_json::from_value(params) {
                Ok(p) => p,
                Err(e) => {
                    return Response::error(
                        id,
                        error_codes::INVALID_PARAMS,
                        format!("Invalid initialize params: {}", e),
                    );
                }
            }
        };

        if let Some(client) = &params.client_info {
            info!("Client {} {} connected", client.name, client.version);
        }

        let result = InitializeResult {
            protocol_version: negotiate_protocol_version(params.protocol_version.as_deref())
                .to_string(),
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            server_info: self.server_info.clone(),
            instructions: Some(INSTRUCTIONS.to_string()),
        };

        match serde_json::to_value(result) {
            Ok(value) => Response::success(id, value),
            Err(e) => Response::error(id, error_codes::INTERNAL_ERROR, e.to_string()),
        }
    }

    async fn call_tool(&self, id: Option<RequestId>, params: Value, origin: &CallOrigin) -> Response {
        let params: ToolCallParams = match serde_json::from_value(params) {
            Ok(p) => p,
            Err(e) => {
                let err = BridgeError::InvalidParams(format!("Invalid tool call params: {}", e));
                return Response::bridge_error(id, &err);
            }
        };

        let arguments = match params.arguments {
            Value::Object(map) => map,
            Value::Null => Arguments::new(),
            other => {
                let err = BridgeError::InvalidParams(format!(
                    "tool arguments must be an object, got {}",
                    other
                ));
                return Response::bridge_error(id, &err);
            }
        };

        let request_id = id
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default();
        let call = ToolCallRequest::new(request_id, params.name, arguments, origin.clone());

        match self.router.dispatch(call).await {
            Ok(result) => Response::success(id, call_result(&result)),
            Err(e) => Response::bridge_error(id, &e),
        }
    }
}
