use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;

use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::traits::Tool;
use flowgraph_core::types::{ToolContext, ToolResult};

/// Returns its input serialized as JSON. Requires a `message` field.
#[derive(Debug, Default)]
pub struct EchoTool {
    calls: AtomicUsize,
}

impl EchoTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the input back"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "message": { "type": "string" } },
            "required": ["message"]
        })
    }

    fn execute(&self, input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolResult::success(input.to_string()))
        })
    }
}

/// Always reports a failed result.
#[derive(Debug)]
pub struct FailingTool {
    pub message: String,
}

impl FailingTool {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Tool for FailingTool {
    fn name(&self) -> &str {
        "fail"
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    fn execute(&self, _input: serde_json::Value, _ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move { Ok(ToolResult::error(self.message.clone())) })
    }
}

/// Sleeps before answering; returns `Cancelled` if the context token fires first.
#[derive(Debug)]
pub struct SlowTool {
    pub delay: Duration,
    pub timeout_secs: u64,
}

impl SlowTool {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            timeout_secs: 30,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }
}

impl Tool for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Sleeps, then succeeds"
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }

    fn execute(&self, _input: serde_json::Value, ctx: ToolContext) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => Ok(ToolResult::success("done")),
                _ = ctx.cancel.cancelled() => Err(FlowError::Cancelled),
            }
        })
    }

    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}
