//! Server-Sent-Events transport: a long-lived GET stream carries results,
//! tool calls arrive on a separate POST URL addressed by a `sessionId` query
//! parameter.
//!
//! Outbound events go through an unbounded channel bridged to the HTTP
//! layer's SSE stream; every event is yielded as its own frame so it is
//! flushed to the wire immediately instead of sitting in a compression
//! buffer. The SSE routes must stay outside any compression layer.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::protocol::{JsonRpcRequest, JsonRpcResponse};
use crate::service::McpService;

use super::{McpTransport, ServerEvent, ServerEventStream, TransportReply, TransportType};

pub struct SseTransport {
    session_id: String,
    post_url: String,
    sender: Mutex<Option<mpsc::UnboundedSender<ServerEvent>>>,
}

impl SseTransport {
    pub fn new(session_id: String, post_url: &str) -> Self {
        Self {
            session_id,
            post_url: post_url.to_string(),
            sender: Mutex::new(None),
        }
    }

    fn push(&self, event: ServerEvent) -> Result<()> {
        let sender = self.sender.lock().expect("sse sender lock poisoned");
        match sender.as_ref() {
            Some(tx) => tx.send(event).map_err(|_| AppError::ConnectionClosed),
            None => Err(AppError::ConnectionClosed),
        }
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    fn transport_type(&self) -> TransportType {
        TransportType::Sse
    }

    fn session_id(&self) -> Option<String> {
        Some(self.session_id.clone())
    }

    async fn send(&self, message: &JsonRpcResponse) -> Result<()> {
        let data = serde_json::to_string(message)?;
        self.push(ServerEvent {
            event: "message".to_string(),
            data,
        })
    }

    async fn handle_message(
        &self,
        service: &McpService,
        request: JsonRpcRequest,
    ) -> Result<TransportReply> {
        if let Some(response) = service.handle_request(request).await {
            self.send(&response).await?;
        }
        // The POST itself is always acknowledged; the payload travels over
        // the event stream.
        Ok(TransportReply::Accepted)
    }

    /// Attach the outbound stream. The first event is the `endpoint` event
    /// telling the client where to POST messages for this session.
    async fn open_stream(&self) -> Result<ServerEventStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ServerEvent {
            event: "endpoint".to_string(),
            data: format!("{}?sessionId={}", self.post_url, self.session_id),
        })
        .map_err(|_| AppError::ConnectionClosed)?;

        *self.sender.lock().expect("sse sender lock poisoned") = Some(tx);
        debug!("SSE stream opened for session {}", self.session_id);
        Ok(rx)
    }

    async fn close(&self) -> Result<()> {
        // Dropping the sender ends the client's event stream.
        self.sender.lock().expect("sse sender lock poisoned").take();
        debug!("SSE transport closed for session {}", self.session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::ExecutionCoordinator;
    use crate::tools::test_support::EchoTool;
    use serde_json::json;
    use std::sync::Arc;

    fn transport() -> SseTransport {
        SseTransport::new("sid".to_string(), "/messages")
    }

    #[tokio::test]
    async fn endpoint_event_is_emitted_first() {
        let transport = transport();
        let mut stream = transport.open_stream().await.unwrap();

        let event = stream.recv().await.unwrap();
        assert_eq!(event.event, "endpoint");
        assert_eq!(event.data, "/messages?sessionId=sid");
    }

    #[tokio::test]
    async fn send_requires_an_open_stream() {
        let transport = transport();
        let message = JsonRpcResponse::success(Some(json!(1)), json!({}));
        assert!(matches!(
            transport.send(&message).await,
            Err(AppError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn handle_message_acknowledges_and_streams_response() {
        let transport = transport();
        let mut stream = transport.open_stream().await.unwrap();
        stream.recv().await.unwrap(); // endpoint event

        let service = McpService::new(
            "test",
            "sid",
            vec![EchoTool::named("echo")],
            Arc::new(ExecutionCoordinator::new()),
        );
        let request = crate::protocol::parse(
            r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#,
        )
        .unwrap();

        let reply = transport.handle_message(&service, request).await.unwrap();
        assert!(matches!(reply, TransportReply::Accepted));

        let event = stream.recv().await.unwrap();
        assert_eq!(event.event, "message");
        assert!(event.data.contains("\"tools\""));
    }

    #[tokio::test]
    async fn close_ends_the_stream() {
        let transport = transport();
        let mut stream = transport.open_stream().await.unwrap();
        stream.recv().await.unwrap();

        transport.close().await.unwrap();
        assert!(stream.recv().await.is_none());
    }
}
