//! Registry of the tools offered to the chat assistant.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::llm::ToolDefinition;
use crate::tools::tool::Tool;

/// Tools keyed by name. Iteration order is alphabetical, so the model sees
/// the same tool list on every request.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool during startup, before the registry is shared.
    pub fn register_sync(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.tools.try_write() {
            Ok(mut tools) => {
                if tools.insert(name.clone(), tool).is_some() {
                    tracing::warn!(tool = %name, "Tool registered twice, keeping the latest");
                } else {
                    tracing::debug!(tool = %name, "Registered tool");
                }
            }
            Err(_) => tracing::error!(tool = %name, "Registry busy, tool not registered"),
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Registered tool names, sorted.
    pub async fn list(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.tools.try_read().map(|t| t.len()).unwrap_or(0)
    }

    /// Definitions for the model's tool-calling API.
    pub async fn tool_definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .await
            .values()
            .map(|tool| ToolDefinition {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters_schema(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool::{ToolContext, ToolError, ToolOutput};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Named(&'static str, &'static str);

    #[async_trait]
    impl Tool for Named {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            self.1
        }
        fn parameters_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(
            &self,
            _params: serde_json::Value,
            _ctx: &ToolContext,
        ) -> Result<ToolOutput, ToolError> {
            Ok(ToolOutput::success(serde_json::json!({"success": true}), Duration::ZERO))
        }
    }

    #[tokio::test]
    async fn lookup_by_name() {
        let registry = ToolRegistry::new();
        registry.register_sync(Arc::new(Named("add_task", "adds")));
        assert_eq!(registry.get("add_task").await.unwrap().description(), "adds");
        assert!(registry.get("shell").await.is_none());
    }

    #[tokio::test]
    async fn definitions_are_sorted() {
        let registry = ToolRegistry::new();
        registry.register_sync(Arc::new(Named("search_tasks", "")));
        registry.register_sync(Arc::new(Named("add_task", "")));
        registry.register_sync(Arc::new(Named("list_tasks", "")));

        let names: Vec<String> = registry
            .tool_definitions()
            .await
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, ["add_task", "list_tasks", "search_tasks"]);
        assert_eq!(registry.list().await, names);
    }

    #[test]
    fn reregistering_replaces() {
        let registry = ToolRegistry::new();
        registry.register_sync(Arc::new(Named("add_task", "old")));
        registry.register_sync(Arc::new(Named("add_task", "new")));
        assert_eq!(registry.count(), 1);
    }
}
