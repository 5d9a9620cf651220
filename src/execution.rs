//! Execution strategies: how a tool call is actually carried out.
//!
//! Direct runs the tool in-process; Queued parks the call in the
//! [`PendingCallsManager`] until an external worker settles it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::debug;

use crate::error::Result;
use crate::pending::{PendingCallsManager, PendingValue};
use crate::tools::ToolHandler;

/// Default timeout for queued execution: 120 seconds.
pub const DEFAULT_QUEUED_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    Direct,
    Queued,
}

/// Addressing context for one tool call.
#[derive(Debug, Clone)]
pub struct ToolCallContext {
    pub session_id: String,
    pub message_id: Option<String>,
}

impl ToolCallContext {
    pub fn call_id(&self) -> String {
        PendingCallsManager::call_id(&self.session_id, self.message_id.as_deref())
    }
}

#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn execute_tool(
        &self,
        tool: &dyn ToolHandler,
        arguments: Value,
        context: &ToolCallContext,
    ) -> Result<PendingValue>;
}

/// Calls the tool immediately in-process; any error propagates unchanged.
/// No timeout: direct mode implies synchronous in-process trust.
#[derive(Default)]
pub struct DirectExecutionStrategy;

#[async_trait]
impl ExecutionStrategy for DirectExecutionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Direct
    }

    async fn execute_tool(
        &self,
        tool: &dyn ToolHandler,
        arguments: Value,
        context: &ToolCallContext,
    ) -> Result<PendingValue> {
        debug!(
            "Executing tool {} directly for session {}",
            tool.definition().name,
            context.session_id
        );
        let value = tool.invoke(arguments).await?;
        Ok(Some(value))
    }
}

/// Parks the call until a worker process settles it through the shared
/// [`PendingCallsManager`].
pub struct QueuedExecutionStrategy {
    pending: Arc<PendingCallsManager>,
    timeout: Duration,
}

impl QueuedExecutionStrategy {
    pub fn new(pending: Arc<PendingCallsManager>) -> Self {
        Self::with_timeout(pending, Duration::from_millis(DEFAULT_QUEUED_TIMEOUT_MS))
    }

    pub fn with_timeout(pending: Arc<PendingCallsManager>, timeout: Duration) -> Self {
        Self { pending, timeout }
    }

    /// The shared manager, for wiring an external worker-response listener.
    pub fn pending_calls(&self) -> Arc<PendingCallsManager> {
        self.pending.clone()
    }

    pub fn resolve_tool_call(&self, call_id: &str, result: PendingValue) -> bool {
        self.pending.resolve(call_id, result)
    }

    pub fn reject_tool_call(&self, call_id: &str, error: impl Into<String>) -> bool {
        self.pending.reject(call_id, error)
    }
}

#[async_trait]
impl ExecutionStrategy for QueuedExecutionStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Queued
    }

    async fn execute_tool(
        &self,
        tool: &dyn ToolHandler,
        arguments: Value,
        context: &ToolCallContext,
    ) -> Result<PendingValue> {
        let call_id = context.call_id();
        let tool_name = tool.definition().name;
        debug!(
            "Queueing tool {} as pending call {} for session {}",
            tool_name, call_id, context.session_id
        );
        self.pending
            .wait_for_result(&call_id, &tool_name, arguments, self.timeout)
            .await
    }
}

/// Holds the one active strategy and gates the queue-mode bookkeeping the
/// facade performs around it.
pub struct ExecutionCoordinator {
    strategy: RwLock<Arc<dyn ExecutionStrategy>>,
}

impl Default for ExecutionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionCoordinator {
    pub fn new() -> Self {
        Self {
            strategy: RwLock::new(Arc::new(DirectExecutionStrategy)),
        }
    }

    pub async fn set_strategy(&self, strategy: Arc<dyn ExecutionStrategy>) {
        *self.strategy.write().await = strategy;
    }

    pub async fn strategy(&self) -> Arc<dyn ExecutionStrategy> {
        self.strategy.read().await.clone()
    }

    pub async fn execute_tool(
        &self,
        tool: &dyn ToolHandler,
        arguments: Value,
        context: &ToolCallContext,
    ) -> Result<PendingValue> {
        let strategy = self.strategy().await;
        strategy.execute_tool(tool, arguments, context).await
    }

    pub async fn is_queue_mode(&self) -> bool {
        self.strategy.read().await.kind() == StrategyKind::Queued
    }
}
