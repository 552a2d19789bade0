use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;

use crate::config::ModelConfig;
use crate::error::{FlowError, Result};
use crate::types::*;

/// LLM client — the model-call collaborator.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    ///
    /// System prompts arrive as leading `Role::System` messages.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;

    /// Like [`chat_stream`](Self::chat_stream), but gives up with
    /// `FlowError::Cancelled` once `cancel` fires.
    ///
    /// Decorators that wait on their own (backoff, permits) override this so
    /// the wait ends with the caller's step.
    fn chat_stream_cancellable(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let request = self.chat_stream(config, messages, tools);
        Box::pin(async move {
            tokio::select! {
                result = request => result,
                _ = cancel.cancelled() => Err(FlowError::Cancelled),
            }
        })
    }
}

/// Tool — the side-effecting action collaborator.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used for registry lookup).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

impl<T: LlmClient + ?Sized> LlmClient for std::sync::Arc<T> {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        (**self).chat_stream(config, messages, tools)
    }

    fn chat_stream_cancellable(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        (**self).chat_stream_cancellable(config, messages, tools, cancel)
    }
}

impl<T: Tool + ?Sized> Tool for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn description(&self) -> &str {
        (**self).description()
    }

    fn input_schema(&self) -> serde_json::Value {
        (**self).input_schema()
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        (**self).execute(input, ctx)
    }

    fn timeout_secs(&self) -> u64 {
        (**self).timeout_secs()
    }
}
