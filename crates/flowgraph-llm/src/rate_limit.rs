use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use tokio::sync::{Mutex, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use flowgraph_core::config::{ModelConfig, RateLimitConfig};
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::traits::LlmClient;
use flowgraph_core::types::*;

/// An LLM client that bounds concurrent requests and spaces out request starts.
///
/// One instance is meant to be shared by every model-call step that talks to the
/// same provider, so the limit applies across concurrently running steps and
/// across runs. A permit is held until the returned stream is dropped.
pub struct RateLimitedClient {
    inner: Box<dyn LlmClient>,
    permits: Arc<Semaphore>,
    min_interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

impl RateLimitedClient {
    pub fn new(inner: Box<dyn LlmClient>, config: &RateLimitConfig) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            min_interval: Duration::from_millis(config.min_interval_ms),
            last_start: Mutex::new(None),
        }
    }

    /// Permits currently free.
    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    async fn wait_for_slot(&self) {
        if self.min_interval.is_zero() {
            return;
        }
        let mut last = self.last_start.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(wait_ms = wait.as_millis() as u64, "Spacing LLM request");
                tokio::time::sleep(wait).await;
            }
        }
        *last = Some(Instant::now());
    }
}

impl LlmClient for RateLimitedClient {
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
            let permit = tokio::select! {
                permit = self.permits.clone().acquire_owned() => {
                    permit.map_err(|_| FlowError::LlmRequest("rate limiter closed".into()))?
                }
                _ = cancel.cancelled() => return Err(FlowError::Cancelled),
            };
            tokio::select! {
                _ = self.wait_for_slot() => {}
                _ = cancel.cancelled() => return Err(FlowError::Cancelled),
            }

            let stream = self
                .inner
                .chat_stream_cancellable(&config, messages, &tools, cancel)
                .await?;
            let guarded = stream.map(move |delta| {
                let _held = &permit;
                delta
            });
            Ok(guarded.boxed())
        })
    }
}
