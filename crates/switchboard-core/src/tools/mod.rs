//! Tool registry and executor system

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, SwitchboardError};

pub mod filesystem;
pub mod math;

/// Tool description handed to agents and model backends
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Declared security profile of a tool. Fixed when the handler is built.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolSecurity {
    pub needs_network: bool,
    pub needs_filesystem: bool,
    pub dangerous: bool,
}

impl ToolSecurity {
    pub fn network() -> Self {
        Self {
            needs_network: true,
            ..Default::default()
        }
    }

    pub fn filesystem() -> Self {
        Self {
            needs_filesystem: true,
            ..Default::default()
        }
    }
}

/// Who is calling a tool, and on behalf of which conversation
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub conversation_id: String,
    pub agent_id: String,
    pub call_id: String,
}

/// Trait for executing tools
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, tool_name: &str, input: Value, ctx: &ToolContext) -> Result<String>;
    fn list_tools(&self) -> Vec<ToolDefinition>;
}

/// Individual tool handler
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;

    fn security(&self) -> ToolSecurity {
        ToolSecurity::default()
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> anyhow::Result<String>;
}

/// Registry of available tools.
///
/// The registry only stores and dispatches; permission checks belong to the
/// caller (see [`crate::delegation::AgentToolExecutor`]).
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry preloaded with the built-in tools
    pub fn with_builtins(allowed_dirs: Vec<String>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(math::CalculateTool));
        registry.register(Arc::new(filesystem::ReadFileTool::new(allowed_dirs.clone())));
        registry.register(Arc::new(filesystem::ListDirectoryTool::new(allowed_dirs)));
        registry
    }

    /// Register a tool handler, replacing any tool with the same name
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name = handler.name().to_string();
        if self.tools.contains_key(&name) {
            warn!("Tool '{}' already registered, overwriting", name);
        } else {
            debug!("Registering tool: {}", name);
        }
        self.tools.insert(name, handler);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Remove a tool, returning whether it existed
    pub fn remove(&mut self, name: &str) -> bool {
        let removed = self.tools.remove(name).is_some();
        if removed {
            debug!("Removed tool: {}", name);
        }
        removed
    }

    /// Sorted tool names
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Security profile of a registered tool
    pub fn security(&self, name: &str) -> Option<ToolSecurity> {
        self.tools.get(name).map(|handler| handler.security())
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Get tool definitions for only the named tools
    pub fn filter_tools(&self, names: &[String]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|handler| definition_of(handler.as_ref()))
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn definition_of(handler: &dyn ToolHandler) -> ToolDefinition {
    ToolDefinition {
        name: handler.name().to_string(),
        description: handler.description().to_string(),
        input_schema: handler.input_schema(),
    }
}

#[async_trait]
impl ToolExecutor for ToolRegistry {
    async fn execute(&self, tool_name: &str, input: Value, ctx: &ToolContext) -> Result<String> {
        debug!("Executing tool: {} with input: {:?}", tool_name, input);

        let handler = self
            .tools
            .get(tool_name)
            .ok_or_else(|| SwitchboardError::ToolNotFound(tool_name.to_string()))?;

        match handler.execute(input, ctx).await {
            Ok(result) => {
                debug!("Tool {} succeeded", tool_name);
                Ok(result)
            }
            Err(e) => {
                warn!("Tool {} failed: {}", tool_name, e);
                Err(SwitchboardError::ToolExecution {
                    tool: tool_name.to_string(),
                    message: e.to_string(),
                })
            }
        }
    }

    fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|handler| definition_of(handler.as_ref()))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }
}

/// Helper function to create a JSON schema for tool input
pub fn json_schema(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}
