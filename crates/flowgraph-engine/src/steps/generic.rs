use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use flowgraph_core::error::Result;

use crate::context::StepContext;

type StepFn =
    Arc<dyn Fn(serde_json::Value, StepContext) -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// An arbitrary async function over (workflow input, context).
#[derive(Clone)]
pub struct GenericStep {
    func: StepFn,
}

impl GenericStep {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(serde_json::Value, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |input, ctx| f(input, ctx).boxed()),
        }
    }

    pub fn run(&self, input: serde_json::Value, ctx: StepContext) -> BoxFuture<'static, Result<serde_json::Value>> {
        (self.func)(input, ctx)
    }
}
