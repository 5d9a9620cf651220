//! Top-level coordinator wiring sessions, transports, execution strategies
//! and pending-call bookkeeping to the external webhook boundary.
//!
//! The gateway is an explicitly constructed object: the embedding
//! application's startup code builds one and owns it, and tests construct
//! independent instances with their own stores and strategies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use dashmap::DashMap;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::execution::{
    ExecutionCoordinator, ExecutionStrategy, QueuedExecutionStrategy,
};
use crate::pending::{PendingCallsManager, PendingValue};
use crate::protocol::{
    self, format_tool_result, JsonRpcResponse, ListToolsResponse, McpMessage, McpToolCallInfo,
};
use crate::service::McpService;
use crate::session::{SessionManager, SessionStore};
use crate::tools::{find_tool, tool_definitions, ToolSet};
use crate::transport::{
    McpTransport, ServerEventStream, TransportFactory, TransportReply, TransportType,
    SESSION_ID_HEADER,
};

/// The slice of an inbound webhook request the gateway consumes. The webhook
/// framework owns the real request/response objects; this is the capability
/// boundary between them.
#[derive(Debug, Default, Clone)]
pub struct WebhookRequest {
    pub query: HashMap<String, String>,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl WebhookRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, key: &str, value: &str) -> Self {
        self.query.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = value.parse() {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// Session/message addressing extracted from one request.
#[derive(Debug, Clone)]
pub struct McpMetadata {
    pub session_id: Option<String>,
    /// Empty string (not absent) when the body carries no JSONRPC id, so
    /// call-id construction stays total.
    pub message_id: String,
}

/// What `handle_post_message` reports back to the calling webhook layer.
#[derive(Debug, Clone, Default)]
pub struct HandlePostResult {
    pub was_tool_call: bool,
    pub tool_call_info: Option<McpToolCallInfo>,
    pub message_id: Option<String>,
    pub relay_session_id: Option<String>,
    pub needs_list_tools_relay: bool,
}

#[derive(Debug)]
pub struct PostMessageOutcome {
    pub reply: TransportReply,
    pub result: HandlePostResult,
}

pub struct SseSetup {
    pub session_id: String,
    pub stream: ServerEventStream,
}

pub struct StreamableHttpSetup {
    pub session_id: String,
    pub reply: TransportReply,
}

/// Discriminated worker payload. Replaces the `{_listToolsRequest: true}`
/// sentinel object while staying wire-compatible with workers that send it.
#[derive(Debug, Clone)]
pub enum WorkerResult {
    /// The worker bounced a `tools/list` request back: the tool registry
    /// lives with the main instance, so the local tool list wins over any
    /// payload a worker could supply.
    ListToolsRequest,
    Value(PendingValue),
}

impl WorkerResult {
    pub fn from_value(value: Value) -> Self {
        if let Value::Object(map) = &value {
            if map.get("_listToolsRequest").and_then(Value::as_bool) == Some(true) {
                return WorkerResult::ListToolsRequest;
            }
        }
        WorkerResult::Value(Some(value))
    }
}

pub struct McpGateway {
    sessions: Arc<SessionManager>,
    factory: TransportFactory,
    coordinator: Arc<ExecutionCoordinator>,
    pending_calls: Arc<PendingCallsManager>,
    /// `(session_id, message_id)` pairs for which a 202 went out and a
    /// result is still owed (queue mode only).
    pending_responses: Arc<DashMap<(String, String), ()>>,
    config: Config,
}

impl McpGateway {
    pub fn new(store: Arc<dyn SessionStore>, config: Config) -> Self {
        Self {
            sessions: Arc::new(SessionManager::new(store)),
            factory: TransportFactory::new(),
            coordinator: Arc::new(ExecutionCoordinator::new()),
            pending_calls: Arc::new(PendingCallsManager::new()),
            pending_responses: Arc::new(DashMap::new()),
            config,
        }
    }

    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    pub fn pending_calls(&self) -> Arc<PendingCallsManager> {
        self.pending_calls.clone()
    }

    pub async fn set_session_store(&self, store: Arc<dyn SessionStore>) {
        self.sessions.set_store(store).await;
    }

    pub async fn set_execution_strategy(&self, strategy: Arc<dyn ExecutionStrategy>) {
        self.coordinator.set_strategy(strategy).await;
    }

    /// Switch to queued execution backed by the shared pending-calls manager.
    pub async fn enable_queue_mode(&self) {
        let strategy = QueuedExecutionStrategy::with_timeout(
            self.pending_calls.clone(),
            Duration::from_millis(self.config.tool_timeout_ms),
        );
        self.coordinator.set_strategy(Arc::new(strategy)).await;
        info!("Queue mode enabled");
    }

    pub async fn is_queue_mode(&self) -> bool {
        self.coordinator.is_queue_mode().await
    }

    /// Settle a pending call with a worker-provided result.
    pub fn resolve_tool_call(&self, call_id: &str, result: PendingValue) -> bool {
        self.pending_calls.resolve(call_id, result)
    }

    pub fn reject_tool_call(&self, call_id: &str, error: impl Into<String>) -> bool {
        self.pending_calls.reject(call_id, error)
    }

    /// Query parameter takes precedence over the header: SSE's query-based
    /// addressing must win when a mixed-transport proxy injects a stale
    /// `mcp-session-id` header on the same request.
    pub fn get_session_id(&self, request: &WebhookRequest) -> Option<String> {
        request
            .query
            .get("sessionId")
            .cloned()
            .or_else(|| request.header(SESSION_ID_HEADER).map(|s| s.to_string()))
    }

    pub fn get_mcp_metadata(&self, request: &WebhookRequest) -> McpMetadata {
        let message_id = request
            .body
            .as_ref()
            .and_then(|body| body.get("id"))
            .filter(|id| !id.is_null())
            .map(protocol::id_to_string)
            .unwrap_or_default();
        McpMetadata {
            session_id: self.get_session_id(request),
            message_id,
        }
    }

    /// SSE setup path: create the transport and stream, build the session's
    /// protocol engine and register everything under the new session id.
    pub async fn handle_setup_request(
        &self,
        _request: &WebhookRequest,
        server_name: &str,
        post_url: &str,
        tools: ToolSet,
    ) -> Result<SseSetup> {
        let transport = self.factory.create_sse(post_url);
        let stream = transport.open_stream().await?;
        let session_id = transport
            .session_id()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("transport without session id")))?;

        let service = Arc::new(McpService::new(
            server_name,
            &session_id,
            tools.clone(),
            self.coordinator.clone(),
        ));
        self.sessions
            .register_session(&session_id, service, transport, Some(tools))
            .await?;

        info!("SSE session {} established", session_id);
        Ok(SseSetup { session_id, stream })
    }

    /// Streamable HTTP initialization: the body must be the `initialize`
    /// request; the generated session id travels back in the
    /// `mcp-session-id` response header.
    pub async fn handle_streamable_http_setup(
        &self,
        request: &WebhookRequest,
        server_name: &str,
        tools: ToolSet,
    ) -> Result<StreamableHttpSetup> {
        let body = request
            .body
            .as_ref()
            .ok_or_else(|| AppError::BadRequest("Missing request body".to_string()))?;
        let message = protocol::parse_value(body)
            .ok_or_else(|| AppError::BadRequest("Invalid JSONRPC message".to_string()))?;

        let transport = self.factory.create_streamable_http(None);
        let session_id = transport
            .session_id()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("transport without session id")))?;

        let service = Arc::new(McpService::new(
            server_name,
            &session_id,
            tools.clone(),
            self.coordinator.clone(),
        ));
        self.sessions
            .register_session(&session_id, service.clone(), transport.clone(), Some(tools))
            .await?;

        let reply = transport.handle_message(&service, message).await?;
        info!("Streamable HTTP session {} established", session_id);
        Ok(StreamableHttpSetup { session_id, reply })
    }

    /// Handle one posted message for an existing session.
    ///
    /// A stale or forged session id yields 401 rather than a silent drop. A
    /// Streamable HTTP session that is durable-valid but unknown to this
    /// instance gets its transport recreated first, which is what lets any
    /// instance serve any session of that transport type.
    pub async fn handle_post_message(
        &self,
        request: &WebhookRequest,
        tools: &ToolSet,
        server_name: Option<&str>,
    ) -> Result<PostMessageOutcome> {
        let session_id = self
            .get_session_id(request)
            .ok_or(AppError::NoTransportForSession)?;
        let id_from_header = !request.query.contains_key("sessionId");

        let (transport, service) = match self.sessions.get_session(&session_id) {
            Some(info) => (info.transport, info.service),
            None => {
                // Only header-addressed (Streamable HTTP) sessions can be
                // continued on an instance that never saw them.
                if id_from_header && self.sessions.is_session_valid(&session_id).await? {
                    self.recreate_session(&session_id, tools, server_name).await?
                } else {
                    return Err(AppError::NoTransportForSession);
                }
            }
        };

        let body = request
            .body
            .as_ref()
            .ok_or_else(|| AppError::BadRequest("Missing request body".to_string()))?;
        let message = protocol::parse_value(body)
            .ok_or_else(|| AppError::BadRequest("Invalid JSONRPC message".to_string()))?;
        let message_id = message.id.as_ref().map(protocol::id_to_string);
        let classified = protocol::classify(&message);

        let mut result = HandlePostResult {
            message_id: message_id.clone(),
            ..Default::default()
        };
        if let McpMessage::ToolCall {
            name, arguments, ..
        } = &classified
        {
            result.was_tool_call = true;
            result.tool_call_info = Some(McpToolCallInfo {
                tool_name: name.clone(),
                arguments: arguments.clone(),
                source_node_name: find_tool(tools, name).and_then(|t| t.source_node_name()),
            });
        }

        if self.coordinator.is_queue_mode().await {
            result.relay_session_id = Some(session_id.clone());
            match &classified {
                McpMessage::ListTools { .. } => {
                    // Workers cannot answer tools/list - the registry lives
                    // here. The relay flag tells the caller to special-case
                    // it; the answer arrives via handle_worker_response.
                    result.needs_list_tools_relay = true;
                    self.store_pending_response(
                        &session_id,
                        message_id.as_deref().unwrap_or(""),
                    );
                    return Ok(PostMessageOutcome {
                        reply: TransportReply::Accepted,
                        result,
                    });
                }
                McpMessage::ToolCall { .. } => {
                    self.store_pending_response(
                        &session_id,
                        message_id.as_deref().unwrap_or(""),
                    );
                    self.spawn_processing(&session_id, message_id.clone(), transport, service, message);
                    return Ok(PostMessageOutcome {
                        reply: TransportReply::Accepted,
                        result,
                    });
                }
                // Handshake traffic is always answered locally.
                McpMessage::Other(_) => {}
            }
        }

        let reply = match transport.transport_type() {
            TransportType::Sse => {
                self.spawn_processing(&session_id, message_id, transport, service, message);
                TransportReply::Accepted
            }
            TransportType::StreamableHttp => transport.handle_message(&service, message).await?,
        };

        Ok(PostMessageOutcome { reply, result })
    }

    /// Session termination over DELETE.
    pub async fn handle_delete_request(&self, request: &WebhookRequest) -> Result<()> {
        let session_id = self
            .get_session_id(request)
            .ok_or(AppError::MissingSessionId)?;

        let known = self.sessions.get_session(&session_id).is_some()
            || self.sessions.is_session_valid(&session_id).await?;
        if !known {
            return Err(AppError::SessionNotFound);
        }

        self.sessions.destroy_session(&session_id).await?;
        self.pending_calls.cleanup_by_session_id(&session_id);
        self.pending_responses
            .retain(|(sid, _), _| sid != &session_id);
        info!("Session {} terminated", session_id);
        Ok(())
    }

    /// Queue-mode completion path: route a worker's result back to the live
    /// connection. If this instance holds the awaiting pending call, settle
    /// it and let the awaiting handler format and send; otherwise format and
    /// forward over the transport directly (cross-instance relay).
    pub async fn handle_worker_response(
        &self,
        session_id: &str,
        message_id: &str,
        payload: Value,
    ) -> Result<()> {
        match WorkerResult::from_value(payload) {
            WorkerResult::ListToolsRequest => {
                let tools = match self.sessions.store().await.get_tools(session_id) {
                    Some(tools) => tools,
                    None => self
                        .sessions
                        .get_service(session_id)
                        .map(|service| service.tools().clone())
                        .unwrap_or_default(),
                };
                let response = JsonRpcResponse::success(
                    protocol::string_to_id(message_id),
                    serde_json::to_value(ListToolsResponse {
                        tools: tool_definitions(&tools),
                    })?,
                );
                self.forward_to_transport(session_id, &response).await;
            }
            WorkerResult::Value(value) => {
                let call_id = PendingCallsManager::call_id(
                    session_id,
                    Some(message_id).filter(|m| !m.is_empty()),
                );
                if self.pending_calls.resolve(&call_id, value.clone()) {
                    debug!("Worker response settled pending call {}", call_id);
                } else {
                    let response = JsonRpcResponse::success(
                        protocol::string_to_id(message_id),
                        serde_json::to_value(format_tool_result(value.as_ref()))?,
                    );
                    self.forward_to_transport(session_id, &response).await;
                }
            }
        }

        self.remove_pending_response(session_id, message_id);
        Ok(())
    }

    /// Record that a 202 went out and a result is still owed. A race between
    /// session teardown and a late store call must not crash the server, so
    /// a missing transport only logs a warning.
    pub fn store_pending_response(&self, session_id: &str, message_id: &str) {
        if self.sessions.get_transport(session_id).is_none() {
            warn!(
                "Storing pending response for session {} with no known transport",
                session_id
            );
        }
        self.pending_responses
            .insert((session_id.to_string(), message_id.to_string()), ());
    }

    pub fn has_pending_response(&self, session_id: &str, message_id: &str) -> bool {
        self.pending_responses
            .contains_key(&(session_id.to_string(), message_id.to_string()))
    }

    pub fn remove_pending_response(&self, session_id: &str, message_id: &str) {
        self.pending_responses
            .remove(&(session_id.to_string(), message_id.to_string()));
    }

    pub fn pending_response_count(&self) -> usize {
        self.pending_responses.len()
    }

    /// Attach the standalone outbound stream for a session (GET on the
    /// Streamable HTTP endpoint).
    pub async fn open_stream(&self, request: &WebhookRequest) -> Result<ServerEventStream> {
        let session_id = self
            .get_session_id(request)
            .ok_or(AppError::NoTransportForSession)?;
        let transport = self
            .sessions
            .get_transport(&session_id)
            .ok_or(AppError::NoTransportForSession)?;
        transport.open_stream().await
    }

    async fn recreate_session(
        &self,
        session_id: &str,
        tools: &ToolSet,
        server_name: Option<&str>,
    ) -> Result<(Arc<dyn McpTransport>, Arc<McpService>)> {
        info!(
            "Recreating streamable HTTP transport for session {}",
            session_id
        );
        let transport = self.factory.recreate_streamable_http(session_id);
        let service = Arc::new(McpService::new(
            server_name.unwrap_or(&self.config.server_name),
            session_id,
            tools.clone(),
            self.coordinator.clone(),
        ));
        self.sessions
            .register_session(session_id, service.clone(), transport.clone(), Some(tools.clone()))
            .await?;
        Ok((transport, service))
    }

    /// Process a message off the request path: run it through the protocol
    /// engine and push the response over the session's live connection.
    fn spawn_processing(
        &self,
        session_id: &str,
        message_id: Option<String>,
        transport: Arc<dyn McpTransport>,
        service: Arc<McpService>,
        message: protocol::JsonRpcRequest,
    ) {
        let session_id = session_id.to_string();
        let pending_responses = self.pending_responses.clone();
        tokio::spawn(async move {
            match transport.handle_message(&service, message).await {
                // A request/response transport hands the response back
                // instead of streaming it; push it to the live stream.
                Ok(TransportReply::Json(response)) => {
                    if let Err(error) = transport.send(&response).await {
                        warn!(
                            "Failed to deliver response for session {}: {}",
                            session_id, error
                        );
                    }
                }
                Ok(_) => {}
                Err(error) => {
                    warn!(
                        "Message handling failed for session {}: {}",
                        session_id, error
                    );
                }
            }
            pending_responses
                .remove(&(session_id, message_id.unwrap_or_default()));
        });
    }

    async fn forward_to_transport(&self, session_id: &str, response: &JsonRpcResponse) {
        match self.sessions.get_transport(session_id) {
            Some(transport) => {
                if let Err(error) = transport.send(response).await {
                    warn!(
                        "Failed to forward worker response for session {}: {}",
                        session_id, error
                    );
                }
            }
            None => warn!(
                "Discarding worker response for session {}: no transport on this instance",
                session_id
            ),
        }
    }
}
