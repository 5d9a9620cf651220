use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mcp_gateway::{
    config::Config,
    server::run_server,
    tools::{ToolDefinition, ToolHandler, ToolSet},
};

#[derive(Parser)]
#[command(name = "mcp-gateway")]
#[command(about = "Session-addressed MCP server gateway")]
struct Args {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Server port
    #[arg(long, default_value = "3000")]
    port: u16,

    /// Name reported to MCP clients during the handshake
    #[arg(long, default_value = "mcp-gateway")]
    server_name: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Delegate tool execution to external workers
    #[arg(long)]
    queue_mode: bool,

    /// Timeout for queued tool execution in milliseconds
    #[arg(long, default_value = "120000")]
    tool_timeout_ms: u64,

    /// TTL of durable session markers in seconds
    #[arg(long, default_value = "300")]
    session_ttl_seconds: u64,
}

/// Built-in demo tool so a fresh gateway has something to expose.
struct CurrentTimeTool;

#[async_trait]
impl ToolHandler for CurrentTimeTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "current_time".to_string(),
            description: "Returns the current UTC time".to_string(),
            input_schema: json!({"type": "object", "properties": {}}),
        }
    }

    async fn invoke(&self, _arguments: Value) -> mcp_gateway::Result<Value> {
        Ok(json!({ "utc": chrono::Utc::now().to_rfc3339() }))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("mcp_gateway={}", args.log_level)));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config {
        host: args.host,
        port: args.port,
        server_name: args.server_name,
        queue_mode: args.queue_mode,
        tool_timeout_ms: args.tool_timeout_ms,
        session_ttl_seconds: args.session_ttl_seconds,
        ..Config::default()
    };

    let tools: ToolSet = vec![Arc::new(CurrentTimeTool)];
    run_server(config, tools).await?;
    Ok(())
}
