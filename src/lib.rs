pub mod config;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod pending;
pub mod protocol;
pub mod server;
pub mod service;
pub mod session;
pub mod tools;
pub mod transport;

pub use config::Config;
pub use error::{AppError, Result};
pub use gateway::{HandlePostResult, McpGateway, WebhookRequest, WorkerResult};
pub use pending::PendingCallsManager;
pub use session::{InMemorySessionStore, RedisSessionStore, SessionManager, SessionStore};
pub use tools::{ToolDefinition, ToolHandler, ToolSet};
pub use transport::{McpTransport, TransportFactory, TransportType};
