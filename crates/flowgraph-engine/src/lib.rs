//! Dependency-graph workflow engine.
//!
//! A [`Workflow`] is a validated set of named [`Step`]s. Each step declares the
//! steps it waits on; [`Workflow::execute`] runs every step whose dependencies
//! have completed concurrently, threading completed outputs to dependents
//! through the shared [`ExecutionContext`].

pub mod context;
pub mod error;
pub mod graph;
pub mod prompt;
pub mod scheduler;
pub mod step;
pub mod steps;
pub mod workflow;

pub use context::{ExecutionContext, StepContext, StepOutputs};
pub use error::{CancelReason, ValidationError, WorkflowError};
pub use graph::{EdgeRequirement, StepGraph};
pub use scheduler::{ExecutionResult, StepResult};
pub use step::{Dependency, Step, StepKind};
pub use steps::{BranchStep, GenericStep, ModelCallStep, ToolCallStep};
pub use workflow::{build_workflow, ExecuteOptions, Workflow, WorkflowBuilder};
