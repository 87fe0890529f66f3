//! Tool registry: capability lookup by name and tool-call dispatch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use crate::tools::tool::{Tool, ToolContext, ToolDescriptor};

/// Names of built-in plugins that cannot be shadowed by dynamic registrations.
const PROTECTED_TOOL_NAMES: &[&str] = &[
    "web_search",
    "get_web_content",
    "get_weather",
    "generate_image",
];

/// Registry of available tools.
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
    /// Tracks which names were registered as built-in (protected from shadowing).
    builtin_names: RwLock<HashSet<String>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            builtin_names: RwLock::new(HashSet::new()),
        }
    }

    /// Register a tool. Rejects dynamic tools that try to shadow a built-in name.
    pub async fn register(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.builtin_names.read().await.contains(&name) {
            tracing::warn!(
                tool = %name,
                "Rejected tool registration: would shadow a built-in tool"
            );
            return;
        }
        self.tools.write().await.insert(name.clone(), tool);
        tracing::debug!("Registered tool: {}", name);
    }

    /// Register a tool (sync version for startup, marks as built-in).
    pub fn register_sync(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if let Ok(mut tools) = self.tools.try_write() {
            tools.insert(name.clone(), tool);
            if PROTECTED_TOOL_NAMES.contains(&name.as_str())
                && let Ok(mut builtins) = self.builtin_names.try_write()
            {
                builtins.insert(name.clone());
            }
            tracing::debug!("Registered tool: {}", name);
        }
    }

    /// Get a tool by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().await.get(name).cloned()
    }

    /// Check if a tool exists.
    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    /// List all tool names, sorted.
    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of registered tools.
    pub fn count(&self) -> usize {
        self.tools.try_read().map(|t| t.len()).unwrap_or(0)
    }

    /// Descriptors of every registered tool, sorted by name.
    pub async fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> = self
            .tools
            .read()
            .await
            .values()
            .map(|tool| tool.describe())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Function-tool entries in the shape the assistant service expects.
    pub async fn function_tools(&self) -> Vec<Value> {
        self.descriptors()
            .await
            .into_iter()
            .map(|d| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": d.name,
                        "description": d.description,
                        "parameters": d.parameters,
                    }
                })
            })
            .collect()
    }

    /// Execute the named tool. Unknown names produce an error payload, never a failure.
    pub async fn dispatch(&self, name: &str, params: Value, ctx: &ToolContext) -> Value {
        let Some(tool) = self.get(name).await else {
            tracing::warn!(tool = %name, "Tool call for unknown tool");
            return serde_json::json!({ "error": format!("Unknown tool: {}", name) });
        };
        tracing::info!(
            tool = %name,
            source = %tool.source_name(),
            tool_call_id = ctx.tool_call_id.as_deref().unwrap_or("-"),
            "Dispatching tool call"
        );
        tool.execute(params, ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::tool::ToolError;
    use async_trait::async_trait;

    #[derive(Debug)]
    struct MockTool {
        name: String,
    }

    #[async_trait]
    impl Tool for MockTool {
        fn name(&self) -> &str {
            &self.name
        }
        fn source_name(&self) -> &str {
            "Mock"
        }
        fn description(&self) -> &str {
            "A mock tool for testing"
        }
        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn invoke(&self, params: Value, _ctx: &ToolContext) -> Result<Value, ToolError> {
            Ok(serde_json::json!({ "result": params }))
        }
    }

    fn mock(name: &str) -> Arc<dyn Tool> {
        Arc::new(MockTool {
            name: name.to_string(),
        })
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let registry = ToolRegistry::new();
        registry.register(mock("test_tool")).await;
        assert!(registry.has("test_tool").await);
        assert!(!registry.has("nonexistent").await);

        let retrieved = registry.get("test_tool").await;
        assert_eq!(retrieved.unwrap().name(), "test_tool");
    }

    #[tokio::test]
    async fn test_list_and_count() {
        let registry = ToolRegistry::new();
        registry.register(mock("b")).await;
        registry.register(mock("a")).await;

        assert_eq!(registry.count(), 2);
        assert_eq!(registry.list().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_builtin_cannot_be_shadowed() {
        let registry = ToolRegistry::new();
        registry.register_sync(mock("get_weather"));
        registry.register(mock("get_weather")).await;
        assert_eq!(registry.count(), 1);
    }

    #[tokio::test]
    async fn test_function_tools_shape() {
        let registry = ToolRegistry::new();
        registry.register(mock("my_tool")).await;

        let tools = registry.function_tools().await;
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["type"], "function");
        assert_eq!(tools[0]["function"]["name"], "my_tool");
    }

    #[tokio::test]
    async fn test_dispatch_known_and_unknown() {
        let registry = ToolRegistry::new();
        registry.register(mock("echo")).await;
        let ctx = ToolContext::default();

        let out = registry
            .dispatch("echo", serde_json::json!({"x": 1}), &ctx)
            .await;
        assert_eq!(out, serde_json::json!({"result": {"x": 1}}));

        let out = registry.dispatch("missing", Value::Null, &ctx).await;
        assert_eq!(out, serde_json::json!({"error": "Unknown tool: missing"}));
    }
}
