//! Tool capability contract consumed from the embedding layer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// Wire-visible description of one tool, as returned by `tools/list`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema", alias = "input_schema")]
    pub input_schema: Value,
}

/// Minimal capability contract for an executable tool. Implementations live
/// outside this crate; the gateway only ever needs the definition, the invoke
/// entry point and optional provenance metadata.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn invoke(&self, arguments: Value) -> Result<Value>;

    /// Name of the workflow node that contributed this tool, if any.
    fn source_node_name(&self) -> Option<String> {
        None
    }
}

pub type ToolSet = Vec<Arc<dyn ToolHandler>>;

pub fn find_tool<'a>(tools: &'a [Arc<dyn ToolHandler>], name: &str) -> Option<&'a Arc<dyn ToolHandler>> {
    tools.iter().find(|tool| tool.definition().name == name)
}

pub fn tool_definitions(tools: &[Arc<dyn ToolHandler>]) -> Vec<ToolDefinition> {
    tools.iter().map(|tool| tool.definition()).collect()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use serde_json::json;

    /// Echoes its arguments back; the workhorse of the unit tests.
    pub struct EchoTool {
        pub name: String,
        pub source_node: Option<String>,
    }

    impl EchoTool {
        pub fn named(name: &str) -> Arc<dyn ToolHandler> {
            Arc::new(Self {
                name: name.to_string(),
                source_node: None,
            })
        }

        pub fn with_source(name: &str, source_node: &str) -> Arc<dyn ToolHandler> {
            Arc::new(Self {
                name: name.to_string(),
                source_node: Some(source_node.to_string()),
            })
        }
    }

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.name.clone(),
                description: format!("Echo tool '{}'", self.name),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn invoke(&self, arguments: Value) -> Result<Value> {
            Ok(json!({ "echo": arguments }))
        }

        fn source_node_name(&self) -> Option<String> {
            self.source_node.clone()
        }
    }

    /// Always fails; used to exercise error formatting paths.
    pub struct FailingTool;

    #[async_trait]
    impl ToolHandler for FailingTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: "failing".to_string(),
                description: "Always fails".to_string(),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn invoke(&self, _arguments: Value) -> Result<Value> {
            Err(crate::error::AppError::BadRequest("boom".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::EchoTool;
    use super::*;

    #[test]
    fn find_tool_matches_by_definition_name() {
        let tools: ToolSet = vec![EchoTool::named("alpha"), EchoTool::named("beta")];
        assert!(find_tool(&tools, "beta").is_some());
        assert!(find_tool(&tools, "gamma").is_none());
    }

    #[test]
    fn definitions_preserve_order() {
        let tools: ToolSet = vec![EchoTool::named("alpha"), EchoTool::named("beta")];
        let names: Vec<String> = tool_definitions(&tools).into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }
}
