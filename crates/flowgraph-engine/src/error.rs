use serde::Serialize;
use thiserror::Error;

use flowgraph_core::error::FlowError;

/// Rejected step set. Returned by the builder before any step runs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Workflow has no steps")]
    Empty,

    #[error("Duplicate step name: {name}")]
    DuplicateStep { name: String },

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Step '{step}' waits on label '{label}', which '{branch}' does not declare")]
    UnknownBranchLabel {
        step: String,
        branch: String,
        label: String,
    },

    #[error("Cyclic dependency: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// What stopped a cancelled run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The caller's cancellation token fired.
    Signal,
    /// The run deadline elapsed.
    Deadline,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signal => write!(f, "signal"),
            Self::Deadline => write!(f, "deadline"),
        }
    }
}

/// Run-time failure. Exactly one is returned per failed run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Step '{step}' failed: {source}")]
    StepExecution {
        step: String,
        #[source]
        source: FlowError,
    },

    #[error("Step '{step}' panicked: {message}")]
    StepPanicked { step: String, message: String },

    #[error("Run cancelled ({reason})")]
    Cancelled { reason: CancelReason },
}

impl WorkflowError {
    /// Name of the step responsible, if the run failed in a step.
    pub fn step(&self) -> Option<&str> {
        match self {
            Self::StepExecution { step, .. } | Self::StepPanicked { step, .. } => Some(step),
            Self::Cancelled { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display() {
        let err = ValidationError::CyclicDependency {
            cycle: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "Cyclic dependency: a -> b -> a");
    }

    #[test]
    fn test_step_execution_keeps_source() {
        use std::error::Error as _;

        let err = WorkflowError::StepExecution {
            step: "transform".into(),
            source: FlowError::step("bad row"),
        };
        assert_eq!(err.step(), Some("transform"));
        assert_eq!(err.to_string(), "Step 'transform' failed: Step failed: bad row");
        assert!(err.source().is_some());
    }

    #[test]
    fn test_cancelled_has_no_step() {
        let err = WorkflowError::Cancelled {
            reason: CancelReason::Deadline,
        };
        assert_eq!(err.step(), None);
        assert_eq!(err.to_string(), "Run cancelled (deadline)");
    }
}
