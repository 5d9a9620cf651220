//! JSONRPC message layer: parsing, classification and result formatting.
//!
//! Incoming bodies are decoded once into a tagged [`McpMessage`] so downstream
//! code matches on message kinds instead of probing raw JSON shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JSONRPC_VERSION: &str = "2.0";

/// MCP protocol version - single source of truth
pub const MCP_PROTOCOL_VERSION: &str = "2025-03-26";

// MCP error codes
pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;

pub const METHOD_TOOLS_CALL: &str = "tools/call";
pub const METHOD_TOOLS_LIST: &str = "tools/list";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: Option<Value>,
    pub method: String,
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Option<Value>, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// One incoming MCP message, decoded once and matched exhaustively downstream.
#[derive(Debug, Clone)]
pub enum McpMessage {
    ToolCall {
        id: Option<Value>,
        name: String,
        arguments: Value,
    },
    ListTools {
        id: Option<Value>,
    },
    Other(JsonRpcRequest),
}

/// Tool-call information extracted from a `tools/call` message.
/// `source_node_name` is provenance metadata sourced from the tool registry,
/// never from the wire message itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpToolCallInfo {
    #[serde(rename = "toolName")]
    pub tool_name: String,
    pub arguments: Value,
    #[serde(
        rename = "sourceNodeName",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub source_node_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolContent {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

/// The only shape ever sent back to a client for a tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolResponse {
    pub content: Vec<ToolContent>,
    #[serde(
        rename = "isError",
        alias = "is_error",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResponse {
    pub tools: Vec<crate::tools::ToolDefinition>,
}

/// Parse raw text into a JSONRPC request. Returns `None` on malformed input
/// so callers can degrade gracefully; never panics.
pub fn parse(raw: &str) -> Option<JsonRpcRequest> {
    let request: JsonRpcRequest = serde_json::from_str(raw).ok()?;
    if request.jsonrpc != JSONRPC_VERSION {
        return None;
    }
    Some(request)
}

/// Same as [`parse`] but over an already-decoded JSON value.
pub fn parse_value(value: &Value) -> Option<JsonRpcRequest> {
    let request: JsonRpcRequest = serde_json::from_value(value.clone()).ok()?;
    if request.jsonrpc != JSONRPC_VERSION {
        return None;
    }
    Some(request)
}

/// Classify a request into a tagged message kind.
pub fn classify(request: &JsonRpcRequest) -> McpMessage {
    match request.method.as_str() {
        METHOD_TOOLS_CALL => {
            let name = request
                .params
                .as_ref()
                .and_then(|p| p.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or_default()
                .to_string();
            let arguments = request
                .params
                .as_ref()
                .and_then(|p| p.get("arguments"))
                .cloned()
                .unwrap_or(Value::Null);
            McpMessage::ToolCall {
                id: request.id.clone(),
                name,
                arguments,
            }
        }
        METHOD_TOOLS_LIST => McpMessage::ListTools {
            id: request.id.clone(),
        },
        _ => McpMessage::Other(request.clone()),
    }
}

pub fn is_tool_call(raw: &str) -> bool {
    matches!(
        parse(raw).as_ref().map(classify),
        Some(McpMessage::ToolCall { .. })
    )
}

pub fn is_list_tools_request(raw: &str) -> bool {
    matches!(
        parse(raw).as_ref().map(classify),
        Some(McpMessage::ListTools { .. })
    )
}

/// Extract the correlation id for a response.
pub fn get_request_id(request: &JsonRpcRequest) -> Option<Value> {
    request.id.clone()
}

/// Pull `params.name` / `params.arguments` into the typed structure.
/// Returns `None` for anything that is not a `tools/call` message.
pub fn extract_tool_call_info(request: &JsonRpcRequest) -> Option<McpToolCallInfo> {
    match classify(request) {
        McpMessage::ToolCall {
            name, arguments, ..
        } => Some(McpToolCallInfo {
            tool_name: name,
            arguments,
            source_node_name: None,
        }),
        _ => None,
    }
}

/// Render a JSONRPC id as the string used in call-id construction.
/// Numeric ids render without quotes, string ids without surrounding quotes.
pub fn id_to_string(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Inverse of [`id_to_string`] for relayed message ids: integers round-trip
/// back to JSON numbers, everything else stays a string.
pub fn string_to_id(message_id: &str) -> Option<Value> {
    if message_id.is_empty() {
        return None;
    }
    if let Ok(n) = message_id.parse::<i64>() {
        return Some(Value::Number(n.into()));
    }
    Some(Value::String(message_id.to_string()))
}

/// Normalize any execution outcome into an MCP content block. Total over all
/// JSON-representable values: objects and arrays are JSON-stringified,
/// primitives become their string form, `Some(Null)` becomes `"null"` and
/// `None` (the absent value) becomes `"undefined"`.
pub fn format_tool_result(result: Option<&Value>) -> CallToolResponse {
    let text = match result {
        None => "undefined".to_string(),
        Some(Value::Null) => "null".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Bool(b)) => b.to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(value) => serde_json::to_string(value).unwrap_or_else(|_| value.to_string()),
    };

    CallToolResponse {
        content: vec![ToolContent {
            content_type: "text".to_string(),
            text,
        }],
        is_error: None,
    }
}

/// Normalize a failure into an error content block. The source chain stands
/// in for the stack trace and is included only when present.
pub fn format_error(error: &(dyn std::error::Error + 'static)) -> CallToolResponse {
    let mut text = format!("Error: {}", error);
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(&format!("\n  caused by: {}", cause));
        source = cause.source();
    }

    CallToolResponse {
        content: vec![ToolContent {
            content_type: "text".to_string(),
            text,
        }],
        is_error: Some(true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_rejects_malformed_input() {
        assert!(parse("not json at all").is_none());
        assert!(parse("{\"id\":1}").is_none());
        assert!(parse("{\"jsonrpc\":\"1.0\",\"method\":\"x\",\"id\":1}").is_none());
    }

    #[test]
    fn parse_accepts_well_formed_request() {
        let request = parse(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert_eq!(request.method, "tools/list");
        assert_eq!(request.id, Some(json!(1)));
    }

    #[test]
    fn classifies_tool_calls_and_list_requests() {
        let raw = r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_weather","arguments":{"city":"London"}}}"#;
        assert!(is_tool_call(raw));
        assert!(!is_list_tools_request(raw));

        let info = extract_tool_call_info(&parse(raw).unwrap()).unwrap();
        assert_eq!(info.tool_name, "get_weather");
        assert_eq!(info.arguments, json!({"city": "London"}));
        assert!(info.source_node_name.is_none());

        let list = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
        assert!(is_list_tools_request(list));
        assert!(!is_tool_call(list));
    }

    #[test]
    fn format_tool_result_is_total() {
        let cases: Vec<(Option<Value>, &str)> = vec![
            (Some(json!({"a": 1})), r#"{"a":1}"#),
            (Some(json!("hello")), "hello"),
            (Some(json!(42)), "42"),
            (Some(json!(true)), "true"),
            (Some(Value::Null), "null"),
            (None, "undefined"),
            (Some(json!([1, 2, 3])), "[1,2,3]"),
        ];

        for (input, expected) in cases {
            let result = format_tool_result(input.as_ref());
            assert_eq!(result.content.len(), 1);
            assert_eq!(result.content[0].content_type, "text");
            assert_eq!(result.content[0].text, expected);
            assert!(result.is_error.is_none());
        }
    }

    #[test]
    fn format_error_includes_name_and_message() {
        let error = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let result = format_error(&error);
        assert_eq!(result.is_error, Some(true));
        assert_eq!(result.content[0].text, "Error: boom");
    }

    #[test]
    fn format_error_includes_source_chain() {
        let error = anyhow::anyhow!("inner").context("outer");
        let result = format_error(error.as_ref());
        assert!(result.content[0].text.starts_with("Error: outer"));
        assert!(result.content[0].text.contains("caused by: inner"));
    }

    #[test]
    fn message_id_round_trips() {
        assert_eq!(id_to_string(&json!(7)), "7");
        assert_eq!(id_to_string(&json!("abc")), "abc");
        assert_eq!(string_to_id("7"), Some(json!(7)));
        assert_eq!(string_to_id("abc"), Some(json!("abc")));
        assert_eq!(string_to_id(""), None);
    }
}
