//! Retry with backoff on transient provider errors, then fall back to
//! alternative models.

use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flowgraph_core::config::{ModelConfig, RetryConfig};
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::traits::LlmClient;
use flowgraph_core::types::*;

/// A model client that retries transient failures of its primary model and
/// then tries each fallback model once.
///
/// Backoff waits end early when the caller's step is cancelled, so a
/// cancelled run never sits out a retry schedule.
pub struct RetryingClient {
    primary: Box<dyn LlmClient>,
    fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
    retry_config: RetryConfig,
}

impl RetryingClient {
    pub fn new(
        primary: Box<dyn LlmClient>,
        fallbacks: Vec<(ModelConfig, Box<dyn LlmClient>)>,
        retry_config: RetryConfig,
    ) -> Self {
        Self {
            primary,
            fallbacks,
            retry_config,
        }
    }
}

/// HTTP status carried in a provider error message, e.g. `"HTTP 503"`.
fn status_code(message: &str) -> Option<u16> {
    message
        .split(|c: char| !c.is_ascii_digit())
        .filter(|token| token.len() == 3)
        .filter_map(|token| token.parse::<u16>().ok())
        .find(|code| (100..600).contains(code))
}

/// Whether sending the same request again could succeed.
fn is_transient(e: &FlowError) -> bool {
    match e {
        FlowError::LlmStream(_) => true,
        FlowError::LlmRequest(message) => match status_code(message) {
            Some(status) => status == 408 || status == 429 || (500..600).contains(&status),
            None => {
                let message = message.to_ascii_lowercase();
                message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("connection")
            }
        },
        _ => false,
    }
}

/// Exponential delay before retry number `retry` (zero-based), capped at
/// `max_backoff_ms`, with 0.8x to 1.2x jitter.
fn backoff_delay(retry: u32, config: &RetryConfig) -> Duration {
    let base = config
        .initial_backoff_ms
        .saturating_mul(2u64.saturating_pow(retry))
        .min(config.max_backoff_ms);
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((base as f64 * jitter) as u64)
}

impl LlmClient for RetryingClient {
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.chat_stream_cancellable(config, messages, tools, CancellationToken::new())
    }

    fn chat_stream_cancellable(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
        tools: &[ToolDefinition],
        cancel: CancellationToken,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let config = config.clone();
        let tools = tools.to_vec();

        Box::pin(async move {
            let retries = self.retry_config.max_retries;
            let mut last_err: Option<FlowError> = None;

            for attempt in 0..=retries {
                if attempt > 0 {
                    let delay = backoff_delay(attempt - 1, &self.retry_config);
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(FlowError::Cancelled),
                    }
                }

                let result = self
                    .primary
                    .chat_stream_cancellable(&config, messages.clone(), &tools, cancel.clone())
                    .await;
                match result {
                    Ok(stream) => return Ok(stream),
                    Err(FlowError::Cancelled) => return Err(FlowError::Cancelled),
                    Err(e) if is_transient(&e) && attempt < retries => {
                        warn!(
                            model = %config.model_id,
                            attempt = attempt + 1,
                            max_retries = retries,
                            error = %e,
                            "Transient model error, will retry"
                        );
                        last_err = Some(e);
                    }
                    Err(e) => {
                        last_err = Some(e);
                        break;
                    }
                }
            }

            if !self.fallbacks.is_empty() {
                info!(model = %config.model_id, "Primary model gave up, trying fallbacks");
            }
            for (fb_config, fb_client) in &self.fallbacks {
                if cancel.is_cancelled() {
                    return Err(FlowError::Cancelled);
                }
                match fb_client
                    .chat_stream_cancellable(fb_config, messages.clone(), &tools, cancel.clone())
                    .await
                {
                    Ok(stream) => {
                        info!(
                            model = %fb_config.model_id,
                            provider = %fb_config.provider,
                            "Using fallback model"
                        );
                        return Ok(stream);
                    }
                    Err(FlowError::Cancelled) => return Err(FlowError::Cancelled),
                    Err(e) => {
                        warn!(model = %fb_config.model_id, error = %e, "Fallback model failed");
                    }
                }
            }

            Err(last_err.unwrap_or_else(|| FlowError::LlmRequest("no model attempt was made".into())))
        })
    }
}
