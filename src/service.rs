//! Per-session protocol engine: dispatches the MCP methods a session
//! understands and routes tool calls through the execution coordinator.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::execution::{ExecutionCoordinator, ToolCallContext};
use crate::protocol::{
    self, format_error, format_tool_result, JsonRpcRequest, JsonRpcResponse, ListToolsResponse,
    McpMessage, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, MCP_PROTOCOL_VERSION,
};
use crate::tools::{find_tool, tool_definitions, ToolSet};

pub struct McpService {
    server_name: String,
    session_id: String,
    tools: ToolSet,
    coordinator: Arc<ExecutionCoordinator>,
}

impl McpService {
    pub fn new(
        server_name: impl Into<String>,
        session_id: impl Into<String>,
        tools: ToolSet,
        coordinator: Arc<ExecutionCoordinator>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            session_id: session_id.into(),
            tools,
            coordinator,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// Handle one request. Notifications produce no response (`None`).
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        debug!(
            "Handling MCP request {} for session {}",
            request.method, self.session_id
        );

        match protocol::classify(&request) {
            McpMessage::ListTools { id } => Some(self.handle_list_tools(id)),
            McpMessage::ToolCall {
                id,
                name,
                arguments,
            } => Some(self.handle_tool_call(id, name, arguments).await),
            McpMessage::Other(request) => self.handle_other(request).await,
        }
    }

    fn handle_list_tools(&self, id: Option<Value>) -> JsonRpcResponse {
        let response = ListToolsResponse {
            tools: tool_definitions(&self.tools),
        };
        match serde_json::to_value(response) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::error(
                id,
                INTERNAL_ERROR,
                format!("Failed to serialize tools: {}", error),
            ),
        }
    }

    /// Tool failures are never protocol-level errors: both success and
    /// failure are normalized into a tool-result content block.
    async fn handle_tool_call(
        &self,
        id: Option<Value>,
        name: String,
        arguments: Value,
    ) -> JsonRpcResponse {
        info!("Calling tool {} for session {}", name, self.session_id);

        let tool = match find_tool(&self.tools, &name) {
            Some(tool) => tool,
            None => {
                warn!("Tool '{}' not found for session {}", name, self.session_id);
                let result = crate::protocol::CallToolResponse {
                    content: vec![crate::protocol::ToolContent {
                        content_type: "text".to_string(),
                        text: format!("Tool '{}' not found", name),
                    }],
                    is_error: Some(true),
                };
                return Self::tool_result_response(id, result);
            }
        };

        let context = ToolCallContext {
            session_id: self.session_id.clone(),
            message_id: id.as_ref().map(protocol::id_to_string),
        };

        let result = match self.coordinator.execute_tool(tool.as_ref(), arguments, &context).await
        {
            Ok(value) => format_tool_result(value.as_ref()),
            Err(error) => {
                warn!("Tool {} failed for session {}: {}", name, self.session_id, error);
                format_error(&error)
            }
        };

        Self::tool_result_response(id, result)
    }

    async fn handle_other(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        match request.method.as_str() {
            "initialize" => Some(self.handle_initialize(request)),
            // Notifications require no response.
            "notifications/initialized" | "notifications/cancelled" => None,
            "ping" => Some(JsonRpcResponse::success(request.id, json!({}))),
            method => {
                debug!("Unknown method {} for session {}", method, self.session_id);
                request.id.as_ref()?;
                Some(JsonRpcResponse::error(
                    request.id,
                    METHOD_NOT_FOUND,
                    format!("Method '{}' not found", method),
                ))
            }
        }
    }

    fn handle_initialize(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let client_version = request
            .params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(|v| v.as_str());

        let client_version = match client_version {
            Some(version) => version,
            None => {
                return JsonRpcResponse::error(
                    request.id,
                    INVALID_PARAMS,
                    "Missing initialize parameters",
                )
            }
        };

        if client_version != MCP_PROTOCOL_VERSION {
            info!(
                "Protocol version mismatch: client requested {}, negotiating down to {}",
                client_version, MCP_PROTOCOL_VERSION
            );
        }

        JsonRpcResponse::success(
            request.id,
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {
                    "tools": { "listChanged": false }
                },
                "serverInfo": {
                    "name": self.server_name,
                    "version": env!("CARGO_PKG_VERSION"),
                }
            }),
        )
    }

    fn tool_result_response(
        id: Option<Value>,
        result: crate::protocol::CallToolResponse,
    ) -> JsonRpcResponse {
        match serde_json::to_value(result) {
            Ok(value) => JsonRpcResponse::success(id, value),
            Err(error) => JsonRpcResponse::error(
                id,
                INTERNAL_ERROR,
                format!("Failed to serialize tool response: {}", error),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::test_support::{EchoTool, FailingTool};

    fn service(tools: ToolSet) -> McpService {
        McpService::new("test-server", "S", tools, Arc::new(ExecutionCoordinator::new()))
    }

    fn request(method: &str, id: Option<Value>, params: Option<Value>) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn initialize_negotiates_version() {
        let service = service(vec![]);
        let response = service
            .handle_request(request(
                "initialize",
                Some(json!(1)),
                Some(json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "c", "version": "0"}
                })),
            ))
            .await
            .unwrap();

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], MCP_PROTOCOL_VERSION);
        assert_eq!(result["serverInfo"]["name"], "test-server");
    }

    #[tokio::test]
    async fn initialized_notification_has_no_response() {
        let service = service(vec![]);
        assert!(service
            .handle_request(request("notifications/initialized", None, None))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn list_tools_returns_registered_definitions() {
        let service = service(vec![EchoTool::named("a"), EchoTool::named("b")]);
        let response = service
            .handle_request(request("tools/list", Some(json!(2)), None))
            .await
            .unwrap();
        let tools = response.result.unwrap()["tools"].as_array().unwrap().len();
        assert_eq!(tools, 2);
    }

    #[tokio::test]
    async fn tool_call_formats_success_and_failure() {
        let service = service(vec![EchoTool::named("echo"), Arc::new(FailingTool)]);

        let ok = service
            .handle_request(request(
                "tools/call",
                Some(json!(3)),
                Some(json!({"name": "echo", "arguments": {"x": 1}})),
            ))
            .await
            .unwrap();
        let content = &ok.result.unwrap()["content"][0];
        assert_eq!(content["type"], "text");
        assert!(content["text"].as_str().unwrap().contains("\"x\":1"));

        let failed = service
            .handle_request(request(
                "tools/call",
                Some(json!(4)),
                Some(json!({"name": "failing", "arguments": {}})),
            ))
            .await
            .unwrap();
        let result = failed.result.unwrap();
        assert_eq!(result["isError"], json!(true));
        assert!(result["content"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("Error: "));
    }

    #[tokio::test]
    async fn unknown_tool_is_a_tool_level_error() {
        let service = service(vec![]);
        let response = service
            .handle_request(request(
                "tools/call",
                Some(json!(5)),
                Some(json!({"name": "ghost", "arguments": {}})),
            ))
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], json!(true));
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let service = service(vec![]);
        let response = service
            .handle_request(request("prompts/list", Some(json!(6)), None))
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, METHOD_NOT_FOUND);
    }
}
