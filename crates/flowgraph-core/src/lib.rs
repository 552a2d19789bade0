pub mod config;
pub mod error;
pub mod event;
pub mod traits;
pub mod types;

pub use config::{EngineConfig, ModelConfig};
pub use error::{FlowError, Result};
pub use event::EventBus;
pub use types::*;
