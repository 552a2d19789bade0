//! flowgraph: run dependency graphs of steps with maximal concurrency.
//!
//! ```ignore
//! use flowgraph::{build_workflow, ExecuteOptions, Step};
//!
//! let wf = build_workflow("etl", vec![
//!     Step::generic("fetch", |input, _| async move { Ok(input) }),
//!     Step::generic("save", |_, ctx| async move {
//!         Ok(ctx.output("fetch").unwrap_or_default())
//!     })
//!     .after("fetch"),
//! ])?;
//! let result = wf.execute(serde_json::json!({"id": 7}), ExecuteOptions::new()).await?;
//! ```

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

pub use flowgraph_core::config::{
    EngineConfig, EngineSettings, ModelConfig, RateLimitConfig, RetryConfig, ToolsConfig,
};
pub use flowgraph_core::error::{FlowError, Result};
pub use flowgraph_core::event::EventBus;
pub use flowgraph_core::traits::{LlmClient, Tool};
pub use flowgraph_core::types::*;
pub use flowgraph_engine::*;
pub use flowgraph_llm::{RateLimitedClient, RetryingClient};
pub use flowgraph_tools::ToolRegistry;
pub use tokio_util::sync::CancellationToken;

/// Install a `tracing` subscriber.
///
/// The filter comes from `FLOWGRAPH_LOG`, then `RUST_LOG`, falling back to
/// `flowgraph=info,warn`. Does nothing if a subscriber is already installed.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_env("FLOWGRAPH_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("flowgraph=info,warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Wrap a model client with the retry and rate-limit layers from `config`.
///
/// `fallbacks` pair up, in order, with `config.fallback_models`; extra entries
/// on either side are ignored. Share the returned client between every
/// model-call step that should count against the same limit.
pub fn model_client(
    client: Box<dyn LlmClient>,
    fallbacks: Vec<Box<dyn LlmClient>>,
    config: &EngineConfig,
) -> Arc<dyn LlmClient> {
    let retry = config
        .model
        .as_ref()
        .and_then(|m| m.retry.clone())
        .unwrap_or_default();
    let fallbacks = config
        .fallback_models
        .iter()
        .cloned()
        .zip(fallbacks)
        .collect();
    let retrying = RetryingClient::new(client, fallbacks, retry);
    Arc::new(RateLimitedClient::new(Box::new(retrying), &config.rate_limit))
}

/// An empty tool registry bounded by the `[tools]` section of `config`.
pub fn tool_registry(config: &EngineConfig) -> ToolRegistry {
    ToolRegistry::with_config(&config.tools)
}

/// An event bus sized by the `[engine]` section of `config`.
pub fn event_bus(config: &EngineConfig) -> Arc<EventBus> {
    Arc::new(EventBus::new(config.engine.event_capacity.max(1)))
}
