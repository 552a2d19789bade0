use std::sync::Arc;

use tracing::{debug, warn};

use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::types::ToolContext;
use flowgraph_tools::ToolRegistry;

use crate::context::StepContext;

type InputBuilder = Arc<dyn Fn(&serde_json::Value, &StepContext) -> Result<serde_json::Value> + Send + Sync>;

/// Invokes a registered tool.
///
/// Output is `{"content": ...}`, where content is parsed as JSON when the tool
/// returned JSON text and kept as a string otherwise. A tool result flagged as
/// an error fails the step.
#[derive(Clone)]
pub struct ToolCallStep {
    registry: Arc<ToolRegistry>,
    tool: String,
    input: InputBuilder,
}

impl ToolCallStep {
    pub fn new<F>(registry: Arc<ToolRegistry>, tool: impl Into<String>, input: F) -> Self
    where
        F: Fn(&serde_json::Value, &StepContext) -> Result<serde_json::Value> + Send + Sync + 'static,
    {
        Self {
            registry,
            tool: tool.into(),
            input: Arc::new(input),
        }
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    pub async fn run(&self, input: serde_json::Value, ctx: StepContext) -> Result<serde_json::Value> {
        let tool_input = (self.input)(&input, &ctx)?;
        let tool_ctx = ToolContext::new(ctx.run_id().clone(), ctx.step_name())
            .with_cancel(ctx.cancel_token().child_token());

        let result = self.registry.execute(&self.tool, tool_input, tool_ctx).await?;
        if result.is_error {
            warn!(step = %ctx.step_name(), tool = %self.tool, "Tool reported an error");
            return Err(FlowError::ToolExecution {
                tool: self.tool.clone(),
                message: result.content,
            });
        }

        debug!(step = %ctx.step_name(), tool = %self.tool, bytes = result.content.len(), "Tool call complete");
        let content = serde_json::from_str::<serde_json::Value>(&result.content)
            .unwrap_or(serde_json::Value::String(result.content));
        Ok(serde_json::json!({ "content": content }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;
    use flowgraph_core::types::RunId;
    use flowgraph_test_utils::{EchoTool, FailingTool};
    use tokio_util::sync::CancellationToken;

    fn ctx() -> StepContext {
        let run = Arc::new(ExecutionContext::new(RunId::new(), serde_json::Value::Null, false, None));
        StepContext::new(run, "notify", CancellationToken::new())
    }

    fn registry() -> Arc<ToolRegistry> {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool::new());
        registry.register(FailingTool::new("disk full"));
        Arc::new(registry)
    }

    #[tokio::test]
    async fn test_json_content_is_parsed() {
        let step = ToolCallStep::new(registry(), "echo", |_, _| Ok(serde_json::json!({"message": "hi"})));
        let out = step.run(serde_json::Value::Null, ctx()).await.unwrap();
        assert_eq!(out["content"]["message"], "hi");
    }

    #[tokio::test]
    async fn test_error_result_fails_step() {
        let step = ToolCallStep::new(registry(), "fail", |_, _| Ok(serde_json::json!({})));
        let err = step.run(serde_json::Value::Null, ctx()).await.unwrap_err();
        match err {
            FlowError::ToolExecution { tool, message } => {
                assert_eq!(tool, "fail");
                assert_eq!(message, "disk full");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_input_fails_step() {
        let step = ToolCallStep::new(registry(), "echo", |_, _| Ok(serde_json::json!({"wrong": 1})));
        let err = step.run(serde_json::Value::Null, ctx()).await.unwrap_err();
        assert!(matches!(err, FlowError::ToolValidation(_)));
    }

    #[tokio::test]
    async fn test_unknown_tool_fails_step() {
        let step = ToolCallStep::new(registry(), "missing", |_, _| Ok(serde_json::json!({})));
        let err = step.run(serde_json::Value::Null, ctx()).await.unwrap_err();
        assert!(matches!(err, FlowError::ToolNotFound(_)));
    }
}
