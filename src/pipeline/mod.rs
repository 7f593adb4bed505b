//! Generation pipeline: task state machine, storage, orchestration and polling

pub mod orchestrator;
pub mod status;
pub mod task;
pub mod task_store;

pub use orchestrator::{OrchestratorSettings, PipelineOrchestrator, DEFAULT_MAX_TASK_DURATION};
pub use status::{StatusPoller, TaskStatusView};
pub use task::{
    GenerationRequest, GenerationTask, StageOverrides, TaskError, TaskStatus, TaskTransition,
};
pub use task_store::{InMemoryTaskStore, TaskStore};
