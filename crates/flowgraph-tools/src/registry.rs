use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use flowgraph_core::config::ToolsConfig;
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::traits::Tool;
use flowgraph_core::types::{ToolContext, ToolDefinition, ToolResult};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    max_timeout_secs: u64,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::with_config(&ToolsConfig::default())
    }

    pub fn with_config(config: &ToolsConfig) -> Self {
        Self {
            tools: HashMap::new(),
            max_timeout_secs: config.max_timeout_secs,
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tools.
    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// Get tool definitions for sending to the LLM.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect()
    }

    /// Execute a tool by name.
    ///
    /// The input must carry every field the tool's schema lists as `required`.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| FlowError::ToolNotFound(name.to_string()))?;

        validate_required(name, &tool.input_schema(), &input)?;

        let timeout_secs = tool.timeout_secs().min(self.max_timeout_secs);
        let timeout = Duration::from_secs(timeout_secs);
        debug!(tool = %name, step = %ctx.step, timeout_secs, "Executing tool");

        match tokio::time::timeout(timeout, tool.execute(input, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(FlowError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs,
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that an object input carries every `required` field of the schema.
fn validate_required(
    tool: &str,
    schema: &serde_json::Value,
    input: &serde_json::Value,
) -> Result<()> {
    let Some(required) = schema.get("required").and_then(|r| r.as_array()) else {
        return Ok(());
    };
    if required.is_empty() {
        return Ok(());
    }

    let obj = input.as_object().ok_or_else(|| {
        FlowError::ToolValidation(format!("{}: input must be an object", tool))
    })?;

    let missing: Vec<&str> = required
        .iter()
        .filter_map(|f| f.as_str())
        .filter(|f| !obj.contains_key(*f))
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(FlowError::ToolValidation(format!(
            "{}: missing required field(s): {}",
            tool,
            missing.join(", ")
        )))
    }
}
