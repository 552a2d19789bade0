use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use flowgraph_core::config::EngineSettings;
use flowgraph_core::event::EventBus;
use flowgraph_core::types::RunId;

use crate::context::ExecutionContext;
use crate::error::{ValidationError, WorkflowError};
use crate::graph::StepGraph;
use crate::scheduler::{ExecutionResult, Scheduler};
use crate::step::Step;

/// Per-call run options.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    /// Cancelling this token stops the run.
    pub cancel: Option<CancellationToken>,
    /// Stop the run once this much time has passed.
    pub deadline: Option<Duration>,
    /// Log per-step transitions at `info` instead of `debug`.
    pub debug: bool,
}

impl ExecuteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults taken from the `[engine]` config section.
    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            cancel: None,
            deadline: settings.deadline(),
            debug: settings.debug,
        }
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

struct WorkflowInner {
    name: String,
    steps: HashMap<String, Arc<Step>>,
    graph: StepGraph,
    events: Option<Arc<EventBus>>,
}

/// A validated, immutable step graph that can be run any number of times.
///
/// Cloning is cheap and clones share the same step definitions. Runs on the
/// same workflow, concurrent or not, never share state.
#[derive(Clone)]
pub struct Workflow {
    inner: Arc<WorkflowInner>,
}

impl Workflow {
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn graph(&self) -> &StepGraph {
        &self.inner.graph
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.inner.steps.get(name).map(|s| s.as_ref())
    }

    /// Step names in declaration order.
    pub fn step_names(&self) -> Vec<&str> {
        self.inner.graph.step_names().iter().map(String::as_str).collect()
    }

    /// Steps that directly wait on `step`.
    pub fn dependents(&self, step: &str) -> Vec<&str> {
        self.inner.graph.dependents(step).iter().map(String::as_str).collect()
    }

    /// Steps `step` directly waits on.
    pub fn dependencies(&self, step: &str) -> Vec<&str> {
        self.inner.graph.dependencies(step)
    }

    pub fn entry_steps(&self) -> Vec<&str> {
        self.inner.graph.entry_steps()
    }

    pub fn topological_order(&self) -> Vec<&str> {
        self.inner.graph.topological_order()
    }

    /// Run every step once.
    ///
    /// `input` is visible to every step. Returns every completed step's output,
    /// or the first failure.
    pub async fn execute(
        &self,
        input: serde_json::Value,
        options: ExecuteOptions,
    ) -> Result<ExecutionResult, WorkflowError> {
        let run_id = RunId::new();
        debug!(run_id = %run_id, workflow = %self.inner.name, debug = options.debug, "Creating execution context");

        let ctx = Arc::new(ExecutionContext::new(
            run_id,
            input,
            options.debug,
            self.inner.events.clone(),
        ));
        let token = options
            .cancel
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();

        Scheduler::new(
            &self.inner.name,
            &self.inner.steps,
            &self.inner.graph,
            ctx,
            token,
        )
        .run(options.deadline)
        .await
    }
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("name", &self.inner.name)
            .field("steps", &self.inner.graph.step_names())
            .finish()
    }
}

/// Collects steps, then validates them into a [`Workflow`].
pub struct WorkflowBuilder {
    name: String,
    steps: Vec<Step>,
    events: Option<Arc<EventBus>>,
}

impl WorkflowBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            events: None,
        }
    }

    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn steps(mut self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Publish run events to `bus`.
    pub fn event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.events = Some(bus);
        self
    }

    pub fn build(self) -> Result<Workflow, ValidationError> {
        let steps: Vec<Arc<Step>> = self.steps.into_iter().map(Arc::new).collect();
        let graph = StepGraph::build(&steps)?;
        debug!(workflow = %self.name, steps = steps.len(), "Workflow validated");

        let steps = steps
            .into_iter()
            .map(|s| (s.name().to_string(), s))
            .collect();

        Ok(Workflow {
            inner: Arc::new(WorkflowInner {
                name: self.name,
                steps,
                graph,
                events: self.events,
            }),
        })
    }
}

/// Validate `steps` into a workflow named `name`.
pub fn build_workflow(
    name: impl Into<String>,
    steps: impl IntoIterator<Item = Step>,
) -> Result<Workflow, ValidationError> {
    WorkflowBuilder::new(name).steps(steps).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CancelReason;
    use flowgraph_core::error::FlowError;
    use serde_json::json;

    fn noop(name: &str) -> Step {
        Step::generic(name, |_, _| async { Ok(json!(null)) })
    }

    fn sleeper(name: &str, ms: u64) -> Step {
        Step::generic(name, move |_, ctx| async move {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(json!("done")),
                _ = ctx.cancel_token().cancelled() => Err(FlowError::Cancelled),
            }
        })
    }

    #[test]
    fn test_introspection() {
        let wf = Workflow::builder("etl")
            .step(noop("fetch"))
            .step(noop("transform").after("fetch"))
            .step(noop("save").after("transform"))
            .build()
            .unwrap();

        assert_eq!(wf.name(), "etl");
        assert_eq!(wf.step_names(), vec!["fetch", "transform", "save"]);
        assert_eq!(wf.dependents("fetch"), vec!["transform"]);
        assert_eq!(wf.dependencies("save"), vec!["transform"]);
        assert_eq!(wf.entry_steps(), vec!["fetch"]);
        assert_eq!(wf.topological_order(), vec!["fetch", "transform", "save"]);
        assert!(wf.step("transform").is_some());
        assert!(wf.step("missing").is_none());
    }

    #[test]
    fn test_build_workflow_rejects_cycle() {
        let err = build_workflow("loop", vec![noop("a").after("b"), noop("b").after("a")]).unwrap_err();
        assert!(matches!(err, ValidationError::CyclicDependency { .. }));
    }

    #[test]
    fn test_options_from_settings() {
        let settings = EngineSettings {
            debug: true,
            deadline_secs: Some(30),
            event_capacity: 16,
        };
        let options = ExecuteOptions::from_settings(&settings);
        assert!(options.debug);
        assert_eq!(options.deadline, Some(Duration::from_secs(30)));
        assert!(options.cancel.is_none());
    }

    #[tokio::test]
    async fn test_run_ids_differ_per_run() {
        let wf = build_workflow("one", vec![noop("a")]).unwrap();
        let first = wf.execute(json!({}), ExecuteOptions::new()).await.unwrap();
        let second = wf.execute(json!({}), ExecuteOptions::new()).await.unwrap();
        assert_ne!(first.run_id, second.run_id);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_run() {
        let wf = build_workflow("slow", vec![sleeper("wait", 10_000)]).unwrap();
        let err = wf
            .execute(json!({}), ExecuteOptions::new().with_deadline(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Cancelled {
                reason: CancelReason::Deadline
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_signal_stops_run() {
        let wf = build_workflow("slow", vec![sleeper("wait", 10_000), noop("after").after("wait")]).unwrap();
        let token = CancellationToken::new();

        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = wf
            .execute(json!({}), ExecuteOptions::new().with_cancel(token))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Cancelled {
                reason: CancelReason::Signal
            }
        ));
    }
}
