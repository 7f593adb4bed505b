//! Read-only task status for polling clients

use crate::agents::AgentType;
use crate::error::{PipelineError, PipelineResult};
use crate::pipeline::task::{GenerationTask, TaskError, TaskStatus};
use crate::pipeline::task_store::TaskStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

/// Snapshot of a task as seen by a poller.
///
/// Failed and timed-out tasks have the same shape as completed ones; check
/// `status` before reading `output`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: Uuid,
    pub status: TaskStatus,
    pub current_stage: Option<AgentType>,
    pub partial_outputs: BTreeMap<AgentType, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<GenerationTask> for TaskStatusView {
    fn from(task: GenerationTask) -> Self {
        let output = match task.status {
            TaskStatus::Completed => task.output,
            _ => None,
        };
        Self {
            task_id: task.id,
            status: task.status,
            current_stage: task.current_stage,
            partial_outputs: task.stage_outputs,
            output,
            error: task.error,
            created_at: task.created_at,
            updated_at: task.updated_at,
            completed_at: task.completed_at,
        }
    }
}

/// Pull-based status queries against the task store
#[derive(Clone)]
pub struct StatusPoller {
    tasks: Arc<dyn TaskStore>,
}

impl StatusPoller {
    pub fn new(tasks: Arc<dyn TaskStore>) -> Self {
        Self { tasks }
    }

    /// Latest committed state of a task; never waits for progress
    pub async fn get_status(&self, task_id: Uuid) -> PipelineResult<TaskStatusView> {
        self.tasks
            .get(task_id)
            .await?
            .map(TaskStatusView::from)
            .ok_or_else(|| PipelineError::not_found("task", task_id))
    }
}
