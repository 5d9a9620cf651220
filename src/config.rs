#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Name reported in the MCP `initialize` handshake.
    pub server_name: String,
    /// Start with queued execution instead of direct in-process calls.
    pub queue_mode: bool,
    /// Timeout for queued tool execution, in milliseconds.
    pub tool_timeout_ms: u64,
    /// TTL of the durable session marker in a Redis-backed store.
    pub session_ttl_seconds: u64,
    /// SSE keep-alive interval.
    pub sse_keep_alive_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            server_name: "mcp-gateway".to_string(),
            queue_mode: false,
            tool_timeout_ms: crate::execution::DEFAULT_QUEUED_TIMEOUT_MS,
            session_ttl_seconds: 300,
            sse_keep_alive_secs: 30,
        }
    }
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
