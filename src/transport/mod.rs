//! Wire-level transports carrying MCP messages for a session.

pub mod sse;
pub mod streamable_http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::Result;
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::service::McpService;

pub use sse::SseTransport;
pub use streamable_http::StreamableHttpTransport;

/// Session-id header used by the Streamable HTTP transport.
pub const SESSION_ID_HEADER: &str = "mcp-session-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportType {
    #[serde(rename = "sse")]
    Sse,
    #[serde(rename = "streamableHttp")]
    StreamableHttp,
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportType::Sse => write!(f, "sse"),
            TransportType::StreamableHttp => write!(f, "streamableHttp"),
        }
    }
}

/// One server-to-client event on a live stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEvent {
    pub event: String,
    pub data: String,
}

pub type ServerEventStream = mpsc::UnboundedReceiver<ServerEvent>;

/// What the HTTP layer should reply with after a message was handled.
#[derive(Debug, Clone)]
pub enum TransportReply {
    /// 202, the response travels over the live stream (SSE post path).
    Accepted,
    /// Inline JSONRPC response (Streamable HTTP request/response path).
    Json(JsonRpcResponse),
    /// Notification: nothing to send.
    Empty,
}

/// Common capability over both wire transports. Teardown is an explicit
/// awaited method; there are no close callbacks.
#[async_trait]
pub trait McpTransport: Send + Sync {
    fn transport_type(&self) -> TransportType;

    /// May be `None` until initialization completes.
    fn session_id(&self) -> Option<String>;

    /// Push a server-initiated message over the live connection.
    async fn send(&self, message: &JsonRpcResponse) -> Result<()>;

    /// Route one client message through the protocol engine and report how
    /// the HTTP layer should answer.
    async fn handle_message(
        &self,
        service: &McpService,
        request: JsonRpcRequest,
    ) -> Result<TransportReply>;

    /// Attach (or re-attach) the outbound event stream for this transport.
    async fn open_stream(&self) -> Result<ServerEventStream>;

    async fn close(&self) -> Result<()>;
}

/// Creates and recreates transports. Stateless; ownership of the created
/// transports passes to the session manager.
#[derive(Default, Clone)]
pub struct TransportFactory;

impl TransportFactory {
    pub fn new() -> Self {
        Self
    }

    pub fn generate_session_id() -> String {
        Uuid::new_v4().simple().to_string()
    }

    pub fn create_sse(&self, post_url: &str) -> std::sync::Arc<SseTransport> {
        std::sync::Arc::new(SseTransport::new(Self::generate_session_id(), post_url))
    }

    /// Auto-generates a session id when none is supplied.
    pub fn create_streamable_http(
        &self,
        session_id: Option<String>,
    ) -> std::sync::Arc<StreamableHttpTransport> {
        let session_id = session_id.unwrap_or_else(Self::generate_session_id);
        std::sync::Arc::new(StreamableHttpTransport::new(session_id, false))
    }

    /// Rebuild a transport for an existing session on this instance. The
    /// transport is marked initialized at construction, so there is no window
    /// where it exists but still expects a handshake.
    pub fn recreate_streamable_http(
        &self,
        session_id: &str,
    ) -> std::sync::Arc<StreamableHttpTransport> {
        std::sync::Arc::new(StreamableHttpTransport::new(session_id.to_string(), true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_type_wire_names() {
        assert_eq!(TransportType::Sse.to_string(), "sse");
        assert_eq!(TransportType::StreamableHttp.to_string(), "streamableHttp");
    }

    #[test]
    fn factory_generates_distinct_session_ids() {
        let factory = TransportFactory::new();
        let a = factory.create_streamable_http(None);
        let b = factory.create_streamable_http(None);
        assert_ne!(a.session_id(), b.session_id());
    }

    #[test]
    fn recreation_forces_id_and_is_pre_initialized() {
        let factory = TransportFactory::new();
        let transport = factory.recreate_streamable_http("abc123");
        assert_eq!(transport.session_id(), Some("abc123".to_string()));
        assert!(transport.is_initialized());
    }
}
