use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use flowgraph_core::config::ModelConfig;
use flowgraph_core::error::{FlowError, Result};
use flowgraph_core::traits::LlmClient;
use flowgraph_core::types::*;

/// A scripted reply from [`MockLlmClient`].
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Stream these deltas, then end.
    Deltas(Vec<StreamDelta>),
    /// Fail the request before any stream is returned.
    RequestError(String),
    /// Stream these deltas, then yield a stream error.
    StreamError {
        deltas: Vec<StreamDelta>,
        message: String,
    },
    /// Stream these deltas, then hang without ending.
    Stall(Vec<StreamDelta>),
}

impl MockResponse {
    /// A single text fragment with usage and an end-of-turn marker.
    pub fn text(text: impl Into<String>) -> Self {
        let text: String = text.into();
        Self::chunks(&[text.as_str()])
    }

    /// Several text fragments with usage and an end-of-turn marker.
    pub fn chunks(parts: &[&str]) -> Self {
        let mut deltas: Vec<StreamDelta> = parts
            .iter()
            .map(|p| StreamDelta::TextDelta(p.to_string()))
            .collect();
        deltas.push(StreamDelta::Usage {
            input_tokens: 10,
            output_tokens: parts.len() as u64,
        });
        deltas.push(StreamDelta::Stop(StopReason::EndTurn));
        Self::Deltas(deltas)
    }

    pub fn request_error(message: impl Into<String>) -> Self {
        Self::RequestError(message.into())
    }
}

type Responder = Box<dyn Fn(&[ChatMessage]) -> MockResponse + Send + Sync>;

/// Scripted model-call collaborator.
///
/// Replies come from the responder if set, else from the queue, else from the
/// default reply (`"ok"` unless overridden).
pub struct MockLlmClient {
    queue: Mutex<VecDeque<MockResponse>>,
    default: MockResponse,
    responder: Option<Responder>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<ChatMessage>>>,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            default: MockResponse::text("ok"),
            responder: None,
            delay: None,
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    pub fn with_response(self, response: MockResponse) -> Self {
        self.queue.lock().unwrap().push_back(response);
        self
    }

    pub fn with_default(mut self, response: MockResponse) -> Self {
        self.default = response;
        self
    }

    pub fn with_responder(
        mut self,
        responder: impl Fn(&[ChatMessage]) -> MockResponse + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Box::new(responder));
        self
    }

    /// Delay applied before each stream is returned.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Messages received by every call, in call order.
    pub fn calls(&self) -> Vec<Vec<ChatMessage>> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of requests observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn next_response(&self, messages: &[ChatMessage]) -> MockResponse {
        if let Some(ref responder) = self.responder {
            return responder(messages);
        }
        self.queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }
}

impl Default for MockLlmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl LlmClient for MockLlmClient {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
        _tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        Box::pin(async move {
            let response = self.next_response(&messages);
            self.calls.lock().unwrap().push(messages);

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match response {
                MockResponse::Deltas(deltas) => Ok(stream::iter(deltas.into_iter().map(Ok)).boxed()),
                MockResponse::RequestError(message) => Err(FlowError::LlmRequest(message)),
                MockResponse::StreamError { deltas, message } => {
                    let items = deltas
                        .into_iter()
                        .map(Ok)
                        .chain(std::iter::once(Err(FlowError::LlmStream(message))));
                    Ok(stream::iter(items).boxed())
                }
                MockResponse::Stall(deltas) => Ok(stream::iter(deltas.into_iter().map(Ok))
                    .chain(stream::pending())
                    .boxed()),
            }
        })
    }
}

/// Concatenate every text fragment of a delta stream.
pub async fn collect_text(mut stream: BoxStream<'_, Result<StreamDelta>>) -> Result<String> {
    let mut text = String::new();
    while let Some(delta) = stream.next().await {
        if let StreamDelta::TextDelta(t) = delta? {
            text.push_str(&t);
        }
    }
    Ok(text)
}
