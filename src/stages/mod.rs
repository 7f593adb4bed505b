//! Stage executors: the seam to the actual generation work

pub mod executor;
pub mod llm_executor;

pub use executor::{StageError, StageExecutor, StageExecutors, StageInput};
pub use llm_executor::{LlmStageDefaults, LlmStageExecutor};
