//! Registry of tool calls awaiting an out-of-band result.
//!
//! Every entry settles exactly once: an external `resolve`/`reject`, the
//! timeout, or session cleanup, whichever happens first. Settling a missing
//! or already-settled id reports `false` instead of failing, so duplicate or
//! late worker responses are harmless.

use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{AppError, Result};

/// The value a pending call settles with. `None` models the absent value used
/// when a session disappears and the caller must unblock without a result.
pub type PendingValue = Option<Value>;

type SettleSender = oneshot::Sender<std::result::Result<PendingValue, String>>;

struct PendingCall {
    tool_name: String,
    arguments: Value,
    created_at: DateTime<Utc>,
    settle: SettleSender,
}

/// Introspection view over one pending entry.
#[derive(Debug, Clone)]
pub struct PendingCallInfo {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct PendingCallsManager {
    calls: DashMap<String, PendingCall>,
}

impl PendingCallsManager {
    pub fn new() -> Self {
        Self {
            calls: DashMap::new(),
        }
    }

    /// Derive the call id for a `(session, message)` pair. An absent message
    /// id falls back to the literal `default`.
    pub fn call_id(session_id: &str, message_id: Option<&str>) -> String {
        format!("{}_{}", session_id, message_id.unwrap_or("default"))
    }

    /// Register a pending entry and await its settlement. The timeout always
    /// eventually fires, so no caller can hang forever; on timeout the entry
    /// is evicted and a distinct [`AppError::ExecutionTimeout`] is returned.
    pub async fn wait_for_result(
        &self,
        call_id: &str,
        tool_name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> Result<PendingValue> {
        let (tx, rx) = oneshot::channel();

        if self.calls.contains_key(call_id) {
            warn!("Replacing existing pending call for id {}", call_id);
        }
        self.calls.insert(
            call_id.to_string(),
            PendingCall {
                tool_name: tool_name.to_string(),
                arguments,
                created_at: Utc::now(),
                settle: tx,
            },
        );
        debug!("Registered pending call {} for tool {}", call_id, tool_name);

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(AppError::ToolExecution(message)),
            // Entry was force-removed without being settled.
            Ok(Err(_)) => Err(AppError::Internal(anyhow::anyhow!(
                "pending call {} was evicted before settling",
                call_id
            ))),
            Err(_) => {
                self.calls.remove(call_id);
                warn!("Pending call {} timed out after {:?}", call_id, timeout);
                Err(AppError::ExecutionTimeout)
            }
        }
    }

    /// Settle a pending call with a result. Returns `true` iff an entry
    /// existed and its waiter was still listening.
    pub fn resolve(&self, call_id: &str, result: PendingValue) -> bool {
        match self.calls.remove(call_id) {
            Some((_, call)) => {
                debug!("Resolving pending call {} ({})", call_id, call.tool_name);
                call.settle.send(Ok(result)).is_ok()
            }
            None => false,
        }
    }

    /// Settle a pending call with an error. Same return contract as
    /// [`resolve`](Self::resolve).
    pub fn reject(&self, call_id: &str, error: impl Into<String>) -> bool {
        match self.calls.remove(call_id) {
            Some((_, call)) => {
                let message = error.into();
                debug!("Rejecting pending call {}: {}", call_id, message);
                call.settle.send(Err(message)).is_ok()
            }
            None => false,
        }
    }

    pub fn has(&self, call_id: &str) -> bool {
        self.calls.contains_key(call_id)
    }

    pub fn get(&self, call_id: &str) -> Option<PendingCallInfo> {
        self.calls.get(call_id).map(|entry| PendingCallInfo {
            call_id: call_id.to_string(),
            tool_name: entry.tool_name.clone(),
            arguments: entry.arguments.clone(),
            created_at: entry.created_at,
        })
    }

    /// Force-evict an entry without settling it. The waiter then observes an
    /// eviction error; used only during full teardown.
    pub fn remove(&self, call_id: &str) -> bool {
        self.calls.remove(call_id).is_some()
    }

    pub fn count(&self) -> usize {
        self.calls.len()
    }

    /// Resolve every call belonging to a session with the absent value. The
    /// session's connection is gone, so waiters must unblock rather than
    /// surface a spurious failure. Calls of other sessions are untouched.
    pub fn cleanup_by_session_id(&self, session_id: &str) -> usize {
        let prefix = format!("{}_", session_id);
        let ids: Vec<String> = self
            .calls
            .iter()
            .filter(|entry| entry.key().starts_with(&prefix))
            .map(|entry| entry.key().clone())
            .collect();

        let mut cleaned = 0;
        for id in ids {
            if self.resolve(&id, None) {
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            debug!("Cleaned up {} pending calls for session {}", cleaned, session_id);
        }
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn call_id_defaults_missing_message_id() {
        assert_eq!(PendingCallsManager::call_id("S", Some("M")), "S_M");
        assert_eq!(PendingCallsManager::call_id("S", None), "S_default");
    }

    #[tokio::test]
    async fn resolve_settles_waiter_exactly_once() {
        let manager = Arc::new(PendingCallsManager::new());

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .wait_for_result("S_1", "echo", json!({}), Duration::from_secs(5))
                    .await
            })
        };

        // Give the waiter a chance to register.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.has("S_1"));

        assert!(manager.resolve("S_1", Some(json!({"ok": true}))));
        assert_eq!(waiter.await.unwrap().unwrap(), Some(json!({"ok": true})));

        // Subsequent settles on the same id report failure, never panic.
        assert!(!manager.resolve("S_1", Some(json!(1))));
        assert!(!manager.reject("S_1", "late"));
    }

    #[tokio::test]
    async fn reject_surfaces_tool_error() {
        let manager = Arc::new(PendingCallsManager::new());

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .wait_for_result("S_2", "echo", json!({}), Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(manager.reject("S_2", "worker exploded"));

        match waiter.await.unwrap() {
            Err(AppError::ToolExecution(message)) => assert_eq!(message, "worker exploded"),
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn timeout_fires_and_evicts_entry() {
        let manager = PendingCallsManager::new();

        let outcome = manager
            .wait_for_result("S_M", "slow", json!({"a": 1}), Duration::from_millis(50))
            .await;

        match outcome {
            Err(AppError::ExecutionTimeout) => {}
            other => panic!("unexpected outcome: {:?}", other.map(|_| ())),
        }
        assert!(!manager.has("S_M"));
        assert!(!manager.resolve("S_M", Some(json!(1))));
    }

    #[tokio::test]
    async fn cleanup_is_scoped_to_the_session_prefix() {
        let manager = Arc::new(PendingCallsManager::new());

        let mine = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .wait_for_result("S_x", "a", json!({}), Duration::from_secs(5))
                    .await
            })
        };
        let other = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .wait_for_result("S2_x", "b", json!({}), Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(manager.cleanup_by_session_id("S"), 1);

        // The orphaned caller unblocks with the absent value, not an error.
        assert_eq!(mine.await.unwrap().unwrap(), None);

        // The other session is untouched and still resolvable.
        assert!(manager.has("S2_x"));
        assert!(manager.resolve("S2_x", Some(json!(2))));
        assert_eq!(other.await.unwrap().unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn introspection_and_forced_eviction() {
        let manager = Arc::new(PendingCallsManager::new());

        let waiter = {
            let manager = manager.clone();
            tokio::spawn(async move {
                manager
                    .wait_for_result("S_3", "probe", json!({"k": "v"}), Duration::from_secs(5))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let info = manager.get("S_3").unwrap();
        assert_eq!(info.tool_name, "probe");
        assert_eq!(info.arguments, json!({"k": "v"}));
        assert_eq!(manager.count(), 1);

        assert!(manager.remove("S_3"));
        assert_eq!(manager.count(), 0);
        assert!(waiter.await.unwrap().is_err());
    }
}
