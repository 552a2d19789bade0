use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard};

use serde::ser::{Serialize, SerializeMap, Serializer};
use tokio_util::sync::CancellationToken;

use flowgraph_core::event::EventBus;
use flowgraph_core::types::{RunId, WorkflowEvent};

/// Completed step outputs, in completion order.
///
/// Serializes as a JSON object whose keys follow completion order.
#[derive(Debug, Clone, Default)]
pub struct StepOutputs {
    entries: Vec<(String, serde_json::Value)>,
    index: HashMap<String, usize>,
}

impl StepOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a step's output.
    pub fn get(&self, step: &str) -> Option<&serde_json::Value> {
        self.index.get(step).map(|&i| &self.entries[i].1)
    }

    /// Get a step's output as a string, if it is one.
    pub fn get_str(&self, step: &str) -> Option<&str> {
        self.get(step).and_then(|v| v.as_str())
    }

    pub fn contains(&self, step: &str) -> bool {
        self.index.contains_key(step)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Step names in completion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &serde_json::Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Copy into an unordered map.
    pub fn to_map(&self) -> HashMap<String, serde_json::Value> {
        self.entries.iter().cloned().collect()
    }

    /// Record an output. A step's output is written once; later writes are ignored.
    pub(crate) fn insert(&mut self, step: impl Into<String>, value: serde_json::Value) -> bool {
        let step = step.into();
        if self.index.contains_key(&step) {
            return false;
        }
        self.index.insert(step.clone(), self.entries.len());
        self.entries.push((step, value));
        true
    }
}

/// Equal when both hold the same outputs, regardless of completion order.
impl PartialEq for StepOutputs {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(name, value)| other.get(name) == Some(value))
    }
}

impl Serialize for StepOutputs {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Per-run shared state: the workflow input, completed outputs, and diagnostics.
///
/// Created fresh for every `execute()` call. Steps read it through their
/// [`StepContext`]; only the scheduler records outputs.
#[derive(Debug)]
pub struct ExecutionContext {
    run_id: RunId,
    debug: bool,
    input: serde_json::Value,
    outputs: RwLock<StepOutputs>,
    events: Option<Arc<EventBus>>,
}

impl ExecutionContext {
    pub(crate) fn new(
        run_id: RunId,
        input: serde_json::Value,
        debug: bool,
        events: Option<Arc<EventBus>>,
    ) -> Self {
        Self {
            run_id,
            debug,
            input,
            outputs: RwLock::new(StepOutputs::new()),
            events,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    /// The input passed to `execute()`.
    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    /// A completed step's output.
    pub fn output(&self, step: &str) -> Option<serde_json::Value> {
        self.read().get(step).cloned()
    }

    pub fn is_completed(&self, step: &str) -> bool {
        self.read().contains(step)
    }

    /// Snapshot of every output recorded so far.
    pub fn outputs(&self) -> StepOutputs {
        self.read().clone()
    }

    pub(crate) fn record(&self, step: &str, value: serde_json::Value) -> bool {
        self.outputs
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(step, value)
    }

    pub(crate) fn publish(&self, event: WorkflowEvent) {
        if let Some(ref bus) = self.events {
            bus.publish(event);
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StepOutputs> {
        self.outputs.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// A step's view of the run it belongs to.
#[derive(Debug, Clone)]
pub struct StepContext {
    run: Arc<ExecutionContext>,
    step: String,
    cancel: CancellationToken,
}

impl StepContext {
    pub(crate) fn new(run: Arc<ExecutionContext>, step: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            run,
            step: step.into(),
            cancel,
        }
    }

    /// Name of the step this context was handed to.
    pub fn step_name(&self) -> &str {
        &self.step
    }

    pub fn run_id(&self) -> &RunId {
        self.run.run_id()
    }

    pub fn debug(&self) -> bool {
        self.run.debug()
    }

    pub fn input(&self) -> &serde_json::Value {
        self.run.input()
    }

    /// Output of an already-completed step. `None` for steps that have not
    /// finished, were skipped, or do not exist.
    pub fn output(&self, step: &str) -> Option<serde_json::Value> {
        self.run.output(step)
    }

    pub fn outputs(&self) -> StepOutputs {
        self.run.outputs()
    }

    /// Fires when the run is cancelled or times out. Pass it to collaborators.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn publish(&self, event: WorkflowEvent) {
        self.run.publish(event);
    }
}
