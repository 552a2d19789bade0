//! Step kinds: generic closures, model calls, branches, and tool calls.

pub mod branch;
pub mod generic;
pub mod model_call;
pub mod tool_call;

pub use branch::BranchStep;
pub use generic::GenericStep;
pub use model_call::ModelCallStep;
pub use tool_call::ToolCallStep;
