use std::sync::Arc;

use futures::StreamExt;
use tracing::debug;

use flowgraph_core::config::ModelConfig;
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::traits::LlmClient;
use flowgraph_core::types::{ChatMessage, StopReason, StreamDelta, Usage, WorkflowEvent};

use crate::context::StepContext;

type PromptBuilder =
    Arc<dyn Fn(&serde_json::Value, &StepContext) -> Result<Vec<ChatMessage>> + Send + Sync>;

/// Calls the model collaborator and collects its streamed reply.
///
/// Output shape:
/// `{"text": "...", "usage": {"input_tokens": n, "output_tokens": m} | null, "stop_reason": "end_turn" | null}`
#[derive(Clone)]
pub struct ModelCallStep {
    client: Arc<dyn LlmClient>,
    config: ModelConfig,
    system_prompts: Vec<String>,
    prompt: PromptBuilder,
}

impl ModelCallStep {
    /// `prompt` builds the user-side messages from (workflow input, context).
    pub fn new<F>(client: Arc<dyn LlmClient>, config: ModelConfig, prompt: F) -> Self
    where
        F: Fn(&serde_json::Value, &StepContext) -> Result<Vec<ChatMessage>> + Send + Sync + 'static,
    {
        Self {
            client,
            config,
            system_prompts: Vec::new(),
            prompt: Arc::new(prompt),
        }
    }

    /// Add a system prompt. System prompts are sent ahead of the user messages,
    /// in the order they were added.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompts.push(prompt.into());
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub async fn run(&self, input: serde_json::Value, ctx: StepContext) -> Result<serde_json::Value> {
        let mut messages: Vec<ChatMessage> = self
            .system_prompts
            .iter()
            .map(|p| ChatMessage::system(p.as_str()))
            .collect();
        messages.extend((self.prompt)(&input, &ctx)?);
        if messages.is_empty() {
            return Err(FlowError::Prompt("no messages to send".into()));
        }

        let cancel = ctx.cancel_token().clone();
        let mut stream = self
            .client
            .chat_stream_cancellable(&self.config, messages, &[], cancel.clone())
            .await?;

        let mut text = String::new();
        let mut usage: Option<Usage> = None;
        let mut stop_reason: Option<StopReason> = None;

        loop {
            let delta = tokio::select! {
                next = stream.next() => next,
                _ = cancel.cancelled() => return Err(FlowError::Cancelled),
            };
            let Some(delta) = delta else {
                break;
            };

            match delta? {
                StreamDelta::TextDelta(chunk) => {
                    ctx.publish(WorkflowEvent::ModelDelta {
                        run_id: ctx.run_id().clone(),
                        step: ctx.step_name().to_string(),
                        text: chunk.clone(),
                    });
                    text.push_str(&chunk);
                }
                StreamDelta::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    usage
                        .get_or_insert_with(Usage::default)
                        .add(input_tokens, output_tokens);
                }
                StreamDelta::Stop(reason) => stop_reason = Some(reason),
                StreamDelta::ThinkingDelta(_) | StreamDelta::MessageId(_) => {}
            }
        }

        debug!(
            step = %ctx.step_name(),
            model = %self.config.model_id,
            chars = text.len(),
            tokens = usage.map(|u| u.total()).unwrap_or(0),
            "Model call complete"
        );

        Ok(serde_json::json!({
            "text": text,
            "usage": usage,
            "stop_reason": stop_reason,
        }))
    }
}
