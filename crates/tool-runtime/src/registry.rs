use crate::tool::{Tool, ToolDefinition};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name-indexed set of tools, local or subprocess-backed alike.
///
/// Listing order is by tool name so capability output is stable.
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Register a tool. Returns error if name already registered.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), RegistryError> {
        self.register_shared(Arc::new(tool))
    }

    /// Register a tool that is already shared (e.g. an adapter holding a host).
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let def = tool.definition();
        if self.tools.contains_key(&def.name) {
            return Err(RegistryError::DuplicateName(def.name));
        }
        self.tools.insert(def.name, tool);
        Ok(())
    }

    /// Remove a tool by name, returning it if present.
    pub fn remove(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool definitions (for sending to LLM).
    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool with name '{0}' is already registered")]
    DuplicateName(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{EchoTool, ToolContext, ToolError, ToolResult};
    use async_trait::async_trait;
    use serde_json::Value;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition {
                name: self.0.to_string(),
                description: format!("{} tool", self.0),
                input_schema: serde_json::json!({"type": "object"}),
            }
        }

        async fn execute(&self, _input: Value, _ctx: &ToolContext) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success("", self.0))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.get("echo").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn test_duplicate_registration_across_kinds() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        let shared: Arc<dyn Tool> = Arc::new(NamedTool("echo"));
        assert!(matches!(
            registry.register_shared(shared),
            Err(RegistryError::DuplicateName(name)) if name == "echo"
        ));
    }

    #[test]
    fn test_list_is_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(NamedTool("zeta")).unwrap();
        registry.register(NamedTool("alpha")).unwrap();
        registry.register(EchoTool).unwrap();

        let names: Vec<_> = registry.list().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "echo", "zeta"]);
    }

    #[test]
    fn test_remove() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool).unwrap();
        assert!(registry.remove("echo").is_some());
        assert!(registry.is_empty());
        assert!(registry.remove("echo").is_none());
    }
}
