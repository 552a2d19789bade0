//! Shared mocks and fixtures for flowgraph tests.

pub mod llm;
pub mod probe;
pub mod tools;

pub use llm::{collect_text, MockLlmClient, MockResponse};
pub use probe::Probe;
pub use tools::{EchoTool, FailingTool, SlowTool};
