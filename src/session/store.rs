//! Durable session existence plus the per-session tool registry.
//!
//! Two implementations: a process-local map for single-instance deployments
//! and a Redis-backed variant whose marker keys carry a TTL so expired
//! sessions invalidate themselves. In both, the tool registry stays local —
//! tools hold live closures and are never distributed.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::Result;
use crate::tools::ToolSet;

/// Three-method capability over an external key/value publisher (Redis or
/// equivalent). Client internals are out of scope.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn clear(&self, key: &str) -> Result<()>;
}

/// Durable session lifecycle and tool registry. Tools may be set before
/// `register` is ever called; registration and tools are independent.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Idempotent: registering an already-registered id is a no-op.
    async fn register(&self, session_id: &str) -> Result<()>;

    async fn validate(&self, session_id: &str) -> Result<bool>;

    /// No-op on a missing id.
    async fn unregister(&self, session_id: &str) -> Result<()>;

    fn get_tools(&self, session_id: &str) -> Option<ToolSet>;

    fn set_tools(&self, session_id: &str, tools: ToolSet);

    fn clear_tools(&self, session_id: &str);
}

/// Process-local store for single-instance deployments.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: DashMap<String, ()>,
    tools: DashMap<String, ToolSet>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn register(&self, session_id: &str) -> Result<()> {
        self.sessions.insert(session_id.to_string(), ());
        debug!("Registered session {}", session_id);
        Ok(())
    }

    async fn validate(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.contains_key(session_id))
    }

    async fn unregister(&self, session_id: &str) -> Result<()> {
        self.sessions.remove(session_id);
        // Clearing tools here prevents stale tool leakage when a reconnect
        // reuses the same session id.
        self.tools.remove(session_id);
        debug!("Unregistered session {}", session_id);
        Ok(())
    }

    fn get_tools(&self, session_id: &str) -> Option<ToolSet> {
        self.tools.get(session_id).map(|entry| entry.clone())
    }

    fn set_tools(&self, session_id: &str, tools: ToolSet) {
        self.tools.insert(session_id.to_string(), tools);
    }

    fn clear_tools(&self, session_id: &str) {
        self.tools.remove(session_id);
    }
}

/// Multi-instance store: existence lives in a TTL-bounded marker key visible
/// to every instance; expiry silently invalidates old sessions. Tool lookup
/// across instances is not guaranteed - the registry stays local.
pub struct RedisSessionStore {
    publisher: Arc<dyn Publisher>,
    ttl_seconds: u64,
    tools: DashMap<String, ToolSet>,
}

impl RedisSessionStore {
    pub fn new(publisher: Arc<dyn Publisher>, ttl_seconds: u64) -> Self {
        Self {
            publisher,
            ttl_seconds,
            tools: DashMap::new(),
        }
    }

    fn marker_key(session_id: &str) -> String {
        format!("mcp:session:{}", session_id)
    }
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn register(&self, session_id: &str) -> Result<()> {
        self.publisher
            .set(&Self::marker_key(session_id), "1", self.ttl_seconds)
            .await?;
        debug!(
            "Registered session {} with {}s TTL marker",
            session_id, self.ttl_seconds
        );
        Ok(())
    }

    async fn validate(&self, session_id: &str) -> Result<bool> {
        let marker = self.publisher.get(&Self::marker_key(session_id)).await?;
        Ok(marker.is_some())
    }

    async fn unregister(&self, session_id: &str) -> Result<()> {
        self.publisher.clear(&Self::marker_key(session_id)).await?;
        self.tools.remove(session_id);
        debug!("Unregistered session {}", session_id);
        Ok(())
    }

    fn get_tools(&self, session_id: &str) -> Option<ToolSet> {
        self.tools.get(session_id).map(|entry| entry.clone())
    }

    fn set_tools(&self, session_id: &str, tools: ToolSet) {
        self.tools.insert(session_id.to_string(), tools);
    }

    fn clear_tools(&self, session_id: &str) {
        self.tools.remove(session_id);
    }
}
