use parley_core::{ParleyError, ParleyResult, Tool, ToolCall, ToolDescriptor, ToolResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Tools exposed to the agent host, by name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Adds a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.descriptor().name.clone();
        info!(tool = %name, "Registered tool");
        self.tools.insert(name, tool);
    }

    /// Looks a tool up by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Descriptors of every registered tool.
    pub fn list_descriptors(&self) -> Vec<&ToolDescriptor> {
        self.tools.values().map(|t| t.descriptor()).collect()
    }

    /// Runs a call against the tool it names.
    pub async fn execute(&self, call: ToolCall) -> ParleyResult<ToolResult> {
        let tool = self
            .tools
            .get(&call.name)
            .ok_or_else(|| ParleyError::Protocol(format!("Unknown tool: {}", call.name)))?;
        tool.execute(call).await
    }

    /// Number of registered tools.
    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
