use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;

use flowgraph_core::error::Result;

use crate::context::StepContext;
use crate::steps::{BranchStep, GenericStep, ModelCallStep, ToolCallStep};

/// One declared dependency of a step.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// Wait for the named step to complete.
    Step(String),
    /// Wait for the named branch step to complete and select `label`.
    Label { branch: String, label: String },
}

impl Dependency {
    /// Name of the step this dependency waits on.
    pub fn target(&self) -> &str {
        match self {
            Self::Step(name) => name,
            Self::Label { branch, .. } => branch,
        }
    }
}

/// The closed set of step kinds.
pub enum StepKind {
    Generic(GenericStep),
    ModelCall(ModelCallStep),
    Branch(BranchStep),
    ToolCall(ToolCallStep),
}

impl StepKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Generic(_) => "generic",
            Self::ModelCall(_) => "model_call",
            Self::Branch(_) => "branch",
            Self::ToolCall(_) => "tool_call",
        }
    }
}

/// A named unit of work plus the steps it waits on.
///
/// ```ignore
/// let save = Step::generic("save", |_input, ctx| async move {
///     Ok(ctx.output("transform").unwrap_or_default())
/// })
/// .after("transform");
/// ```
pub struct Step {
    name: String,
    dependencies: Vec<Dependency>,
    kind: StepKind,
}

impl Step {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            dependencies: Vec::new(),
            kind,
        }
    }

    /// A step backed by an async closure.
    pub fn generic<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(serde_json::Value, StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        Self::new(name, StepKind::Generic(GenericStep::new(f)))
    }

    pub fn model_call(name: impl Into<String>, step: ModelCallStep) -> Self {
        Self::new(name, StepKind::ModelCall(step))
    }

    pub fn branch(name: impl Into<String>, step: BranchStep) -> Self {
        Self::new(name, StepKind::Branch(step))
    }

    pub fn tool_call(name: impl Into<String>, step: ToolCallStep) -> Self {
        Self::new(name, StepKind::ToolCall(step))
    }

    /// Wait for `step` to complete.
    pub fn after(mut self, step: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::Step(step.into()));
        self
    }

    /// Wait for every step in `steps` to complete.
    pub fn after_all<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(steps.into_iter().map(|s| Dependency::Step(s.into())));
        self
    }

    /// Run only when `branch` selects `label`.
    pub fn on_branch(mut self, branch: impl Into<String>, label: impl Into<String>) -> Self {
        self.dependencies.push(Dependency::Label {
            branch: branch.into(),
            label: label.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    /// Labels this step may select, if it is a branch.
    pub fn branch_labels(&self) -> Option<&[String]> {
        match &self.kind {
            StepKind::Branch(b) => Some(b.labels()),
            _ => None,
        }
    }

    /// Run the step once.
    pub fn run(&self, input: serde_json::Value, ctx: StepContext) -> BoxFuture<'_, Result<serde_json::Value>> {
        match &self.kind {
            StepKind::Generic(s) => s.run(input, ctx),
            StepKind::ModelCall(s) => s.run(input, ctx).boxed(),
            StepKind::Branch(s) => futures::future::ready(s.run(&input, &ctx)).boxed(),
            StepKind::ToolCall(s) => s.run(input, ctx).boxed(),
        }
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind.name())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_builder() {
        let step = Step::generic("report", |_, _| async { Ok(serde_json::Value::Null) })
            .after("stats")
            .after_all(["transform"])
            .on_branch("route", "long");

        assert_eq!(step.name(), "report");
        assert_eq!(step.kind().name(), "generic");
        assert_eq!(
            step.dependencies(),
            &[
                Dependency::Step("stats".into()),
                Dependency::Step("transform".into()),
                Dependency::Label {
                    branch: "route".into(),
                    label: "long".into()
                },
            ]
        );
        assert_eq!(step.dependencies()[2].target(), "route");
        assert!(step.branch_labels().is_none());
    }

    #[test]
    fn test_branch_labels() {
        let step = Step::branch("route", BranchStep::new(["short", "long"], |_, _| Ok("short".into())));
        assert_eq!(step.kind().name(), "branch");
        assert_eq!(step.branch_labels().unwrap(), &["short".to_string(), "long".to_string()]);
    }
}
