//! In-process session runtime: live transport and protocol-engine handles,
//! keyed by session id. Durable truth lives in the [`SessionStore`]; the
//! runtime map is a strictly local cache that may legitimately be absent on
//! other instances.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::Result;
use crate::service::McpService;
use crate::session::store::SessionStore;
use crate::tools::ToolSet;
use crate::transport::McpTransport;

/// Runtime handles for one session. Holds live I/O and is never serialized;
/// exists only on the instance that accepted the connection.
#[derive(Clone)]
pub struct SessionInfo {
    pub session_id: String,
    pub service: Arc<McpService>,
    pub transport: Arc<dyn McpTransport>,
}

pub struct SessionManager {
    store: RwLock<Arc<dyn SessionStore>>,
    sessions: DashMap<String, SessionInfo>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store: RwLock::new(store),
            sessions: DashMap::new(),
        }
    }

    /// Persist the session in the store and cache the runtime handles.
    /// An empty id never registers an anonymous session. Re-registering an
    /// existing id overwrites the runtime entry (last-writer-wins), which is
    /// how a recreated transport takes over on a different instance.
    pub async fn register_session(
        &self,
        session_id: &str,
        service: Arc<McpService>,
        transport: Arc<dyn McpTransport>,
        tools: Option<ToolSet>,
    ) -> Result<()> {
        if session_id.is_empty() {
            warn!("Ignoring session registration without a session id");
            return Ok(());
        }

        let store = self.store().await;
        store.register(session_id).await?;
        self.sessions.insert(
            session_id.to_string(),
            SessionInfo {
                session_id: session_id.to_string(),
                service,
                transport,
            },
        );
        if let Some(tools) = tools {
            store.set_tools(session_id, tools);
        }
        debug!("Session {} registered", session_id);
        Ok(())
    }

    /// Unregister from the store, drop the runtime entry and await transport
    /// teardown. Safe to call on an unknown id.
    pub async fn destroy_session(&self, session_id: &str) -> Result<()> {
        self.store().await.unregister(session_id).await?;
        if let Some((_, info)) = self.sessions.remove(session_id) {
            if let Err(error) = info.transport.close().await {
                warn!("Error closing transport for session {}: {}", session_id, error);
            }
        }
        debug!("Session {} destroyed", session_id);
        Ok(())
    }

    /// Local lookup only: `None` means "not on this instance", not "session
    /// doesn't exist". Use [`is_session_valid`](Self::is_session_valid) for
    /// the durable truth.
    pub fn get_session(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.get(session_id).map(|entry| entry.clone())
    }

    pub fn get_transport(&self, session_id: &str) -> Option<Arc<dyn McpTransport>> {
        self.get_session(session_id).map(|info| info.transport)
    }

    pub fn get_service(&self, session_id: &str) -> Option<Arc<McpService>> {
        self.get_session(session_id).map(|info| info.service)
    }

    pub async fn is_session_valid(&self, session_id: &str) -> Result<bool> {
        self.store().await.validate(session_id).await
    }

    /// Live swap between store implementations (used when queue-mode
    /// configuration is toggled). Runtime entries are unaffected.
    pub async fn set_store(&self, store: Arc<dyn SessionStore>) {
        *self.store.write().await = store;
    }

    pub async fn store(&self) -> Arc<dyn SessionStore> {
        self.store.read().await.clone()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
