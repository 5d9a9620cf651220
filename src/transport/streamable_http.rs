//! Streamable HTTP transport: plain request/response with session continuity
//! carried in the `mcp-session-id` header instead of a persistent socket.
//!
//! Because any load-balanced instance may receive a request for a session it
//! never saw, a transport for an existing session id can be reconstructed and
//! marked pre-initialized, skipping the MCP handshake the client already
//! performed elsewhere.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::service::McpService;

use super::{McpTransport, ServerEvent, ServerEventStream, TransportReply, TransportType};

pub struct StreamableHttpTransport {
    session_id: String,
    initialized: AtomicBool,
    sender: Mutex<Option<mpsc::UnboundedSender<ServerEvent>>>,
}

impl StreamableHttpTransport {
    /// `initialized` is fixed at construction so recreation has no window
    /// where the transport exists but still expects a handshake.
    pub fn new(session_id: String, initialized: bool) -> Self {
        Self {
            session_id,
            initialized: AtomicBool::new(initialized),
            sender: Mutex::new(None),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl McpTransport for StreamableHttpTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::StreamableHttp
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }

    /// Server-initiated messages go to the standalone GET stream, if the
    /// client opened one on this instance.
    async fn send(&self, message: &JsonRpcResponse) -> Result<()> {
        let data = serde_json::to_string(message)?;
        let sender = self.sender.lock().expect("stream sender lock poisoned");
        match sender.as_ref() {
            Some(tx) => tx
                .send(ServerEvent {
                    event: "message".to_string(),
                    data,
                })
                .map_err(|_| AppError::ConnectionClosed),
            None => Err(AppError::ConnectionClosed),
        }
    }

    async fn handle_message(
        &self,
        service: &McpService,
        request: JsonRpcRequest,
    ) -> Result<TransportReply> {
        let is_initialize = request.method == "initialize";
        if !is_initialize && !self.is_initialized() {
            return Err(AppError::BadRequest(
                "Session not initialized".to_string(),
            ));
        }

        let response = service.handle_request(request).await;
        if is_initialize {
            self.mark_initialized();
            debug!("Session {} initialized", self.session_id);
        }

        Ok(match response {
            Some(response) => TransportReply::Json(response),
            None => TransportReply::Empty,
        })
    }

    async fn open_stream(&self) -> Result<ServerEventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.sender.lock().expect("stream sender lock poisoned") = Some(tx);
        debug!(
            "Standalone stream opened for session {}",
            self.session_id
        );
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        self.sender
            .lock()
            .expect("stream sender lock poisoned")
            .take();
        debug!("Streamable HTTP transport closed for session {}", self.session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionCoordinator;
    use crate::protocol::parse;
    use std::sync::Arc;

    fn service() -> McpService {
        McpService::new("test", "abc123", vec![], Arc::new(ExecutionCoordinator::new()))
    }

    #[tokio::test]
    async fn initialize_marks_transport_and_replies_inline() {
        let transport = StreamableHttpTransport::new("abc123".to_string(), false);
        assert!(!transport.is_initialized());

        let request = parse(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{},"clientInfo":{"name":"c","version":"0"}}}"#,
        )
        .unwrap();
        let reply = transport.handle_message(&service(), request).await.unwrap();

        assert!(transport.is_initialized());
        match reply {
            TransportReply::Json(response) => assert!(response.result.is_some()),
            other => panic!("unexpected reply: {:?}", other),
        }
    }

    #[tokio::test]
    async fn messages_before_initialize_are_rejected() {
        let transport = StreamableHttpTransport::new("abc123".to_string(), false);
        let request = parse(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        assert!(matches!(
            transport.handle_message(&service(), request).await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn recreated_transport_needs_no_handshake() {
        let transport = StreamableHttpTransport::new("abc123".to_string(), true);
        let request = parse(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        let reply = transport.handle_message(&service(), request).await.unwrap();
        assert!(matches!(reply, TransportReply::Json(_)));
    }

    #[tokio::test]
    async fn send_reaches_the_standalone_stream() {
        let transport = StreamableHttpTransport::new("abc123".to_string(), true);
        let mut stream = transport.open_stream().await.unwrap();

        let message = JsonRpcResponse::success(Some(serde_json::json!(1)), serde_json::json!({}));
        transport.send(&message).await.unwrap();

        let event = stream.recv().await.unwrap();
        assert_eq!(event.event, "message");
        assert!(event.data.contains("\"jsonrpc\""));
    }
}
