use std::sync::Arc;

use tracing::debug;

use flowgraph_core::error::{FlowError, Result};

use crate::context::StepContext;

type Predicate = Arc<dyn Fn(&serde_json::Value, &StepContext) -> Result<String> + Send + Sync>;

/// Selects one of a declared set of labels.
///
/// The selected label becomes the step's output (a JSON string). Steps that
/// depend on any other label of this branch are skipped.
#[derive(Clone)]
pub struct BranchStep {
    labels: Vec<String>,
    predicate: Predicate,
}

impl BranchStep {
    pub fn new<I, S, F>(labels: I, predicate: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&serde_json::Value, &StepContext) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            labels: labels.into_iter().map(Into::into).collect(),
            predicate: Arc::new(predicate),
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn declares(&self, label: &str) -> bool {
        self.labels.iter().any(|l| l == label)
    }

    pub fn run(&self, input: &serde_json::Value, ctx: &StepContext) -> Result<serde_json::Value> {
        let label = (self.predicate)(input, ctx)?;
        if !self.declares(&label) {
            return Err(FlowError::UnknownBranchLabel {
                label,
                declared: self.labels.clone(),
            });
        }
        debug!(step = %ctx.step_name(), label = %label, "Branch selected");
        Ok(serde_json::Value::String(label))
    }
}
