//! Storage of generation tasks
//!
//! Transitions are validated against the task state machine inside the store's
//! write section, so concurrent readers only ever observe committed states and
//! a terminal task can never be modified again.

use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::task::{GenerationTask, TaskTransition};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Record of generation tasks keyed by id
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: GenerationTask) -> PipelineResult<()>;

    async fn get(&self, id: Uuid) -> PipelineResult<Option<GenerationTask>>;

    /// Apply a transition atomically and return the committed task
    async fn apply(&self, id: Uuid, transition: TaskTransition) -> PipelineResult<GenerationTask>;
}

/// In-memory task store
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: RwLock<HashMap<Uuid, GenerationTask>>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: GenerationTask) -> PipelineResult<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(PipelineError::internal(format!(
                "task {} already exists",
                task.id
            )));
        }
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> PipelineResult<Option<GenerationTask>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn apply(&self, id: Uuid, transition: TaskTransition) -> PipelineResult<GenerationTask> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| PipelineError::not_found("task", id))?;

        debug!(task_id = %id, transition = %transition, "Applying task transition");
        task.apply(transition)?;
        Ok(task.clone())
    }
}
