use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // Step errors
    #[error("Step failed: {0}")]
    Step(String),

    #[error("Branch selected undeclared label '{label}' (declared: {declared:?})")]
    UnknownBranchLabel { label: String, declared: Vec<String> },

    #[error("Prompt construction failed: {0}")]
    Prompt(String),

    #[error("Cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Shorthand for a free-form step failure.
    pub fn step(message: impl Into<String>) -> Self {
        Self::Step(message.into())
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = FlowError::ToolExecution {
            tool: "echo".into(),
            message: "boom".into(),
        };
        assert_eq!(e.to_string(), "Tool execution failed: echo: boom");

        let e = FlowError::step("bad input");
        assert_eq!(e.to_string(), "Step failed: bad input");
    }

    #[test]
    fn test_json_error_converts() {
        let parsed: Result<serde_json::Value> =
            serde_json::from_str::<serde_json::Value>("{not json").map_err(FlowError::from);
        assert!(matches!(parsed, Err(FlowError::Json(_))));
    }
}
