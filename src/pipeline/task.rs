//! Generation requests, task records and the task state machine

use crate::agents::{AgentType, StageMap};
use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Per-stage configuration overrides supplied with a request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ideation: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub research: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<Uuid>,
}

impl StageOverrides {
    pub fn get(&self, stage: AgentType) -> Option<Uuid> {
        match stage {
            AgentType::Ideation => self.ideation,
            AgentType::Research => self.research,
            AgentType::Content => self.content,
            AgentType::Editor => self.editor,
        }
    }
}

/// Immutable input of a generation task.
///
/// Absent fields deserialize as blank so that `validate` can report every
/// missing field at once.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationRequest {
    pub workspace_id: String,
    pub topic: String,
    pub content_type: String,
    pub tone: String,
    pub target_audience: String,
    pub key_points: Vec<String>,
    pub title: String,
    pub agent_config_overrides: StageOverrides,
}

impl GenerationRequest {
    /// Check that all required fields are present and non-blank
    pub fn validate(&self) -> PipelineResult<()> {
        let required = [
            ("workspace_id", &self.workspace_id),
            ("topic", &self.topic),
            ("content_type", &self.content_type),
            ("tone", &self.tone),
            ("target_audience", &self.target_audience),
            ("title", &self.title),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.trim().is_empty())
            .map(|(field, _)| *field)
            .collect();

        if !missing.is_empty() {
            return Err(PipelineError::validation(format!(
                "missing required fields: {}",
                missing.join(", ")
            )));
        }

        if self.key_points.iter().any(|point| point.trim().is_empty()) {
            return Err(PipelineError::validation("key_points must not contain blank entries"));
        }

        Ok(())
    }
}

/// Lifecycle status of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
    Canceled,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Timeout | TaskStatus::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Timeout => "timeout",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure recorded on a failed or timed-out task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub stage: AgentType,
    pub message: String,
}

/// A state change requested by the run loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskTransition {
    /// Enter `running(stage)`
    StartStage(AgentType),
    /// Record the output of the running stage
    StageSucceeded { stage: AgentType, output: String },
    /// Finish after the last stage produced its output
    Complete,
    Fail { stage: AgentType, message: String },
    TimeOut { stage: AgentType, message: String },
    Cancel,
}

impl fmt::Display for TaskTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskTransition::StartStage(stage) => write!(f, "running({stage})"),
            TaskTransition::StageSucceeded { stage, .. } => write!(f, "output({stage})"),
            TaskTransition::Complete => f.write_str("completed"),
            TaskTransition::Fail { .. } => f.write_str("failed"),
            TaskTransition::TimeOut { .. } => f.write_str("timeout"),
            TaskTransition::Cancel => f.write_str("canceled"),
        }
    }
}

/// One generation request moving through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationTask {
    pub id: Uuid,
    pub workspace_id: String,
    pub request: GenerationRequest,
    /// Config ids resolved at submission; later default changes do not apply
    pub stage_configs: StageMap<Uuid>,
    pub status: TaskStatus,
    pub current_stage: Option<AgentType>,
    pub stage_outputs: BTreeMap<AgentType, String>,
    pub output: Option<String>,
    pub error: Option<TaskError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl GenerationTask {
    pub fn new(request: GenerationRequest, stage_configs: StageMap<Uuid>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id: request.workspace_id.clone(),
            request,
            stage_configs,
            status: TaskStatus::Queued,
            current_stage: None,
            stage_outputs: BTreeMap::new(),
            output: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn state_label(&self) -> String {
        match (self.status, self.current_stage) {
            (TaskStatus::Running, Some(stage)) => format!("running({stage})"),
            (status, _) => status.to_string(),
        }
    }

    /// Whether `transition` is allowed from the current state
    pub fn can_apply(&self, transition: &TaskTransition) -> bool {
        match (self.status, transition) {
            (status, _) if status.is_terminal() => false,
            (TaskStatus::Queued, TaskTransition::StartStage(stage)) => {
                *stage == AgentType::Ideation
            }
            (TaskStatus::Running, TaskTransition::StartStage(stage)) => {
                match (self.current_stage, stage.previous()) {
                    (Some(current), Some(previous)) => {
                        current == previous && self.stage_outputs.contains_key(&current)
                    }
                    _ => false,
                }
            }
            (TaskStatus::Running, TaskTransition::StageSucceeded { stage, .. }) => {
                self.current_stage == Some(*stage) && !self.stage_outputs.contains_key(stage)
            }
            (TaskStatus::Running, TaskTransition::Complete) => {
                self.current_stage == Some(AgentType::Editor)
                    && self.stage_outputs.contains_key(&AgentType::Editor)
            }
            // The failing stage is either the running one or the one that
            // could not be started
            (TaskStatus::Queued, TaskTransition::Fail { stage, .. }) => {
                *stage == AgentType::Ideation
            }
            (TaskStatus::Running, TaskTransition::Fail { stage, .. }) => {
                self.current_stage == Some(*stage) || self.current_stage == stage.previous()
            }
            (TaskStatus::Queued | TaskStatus::Running, TaskTransition::TimeOut { .. }) => true,
            (TaskStatus::Queued | TaskStatus::Running, TaskTransition::Cancel) => true,
            _ => false,
        }
    }

    /// Apply a transition, rejecting anything that would regress or touch a
    /// terminal task
    pub fn apply(&mut self, transition: TaskTransition) -> PipelineResult<()> {
        if !self.can_apply(&transition) {
            return Err(PipelineError::invalid_transition(
                self.state_label(),
                &transition,
            ));
        }

        let now = Utc::now();
        match transition {
            TaskTransition::StartStage(stage) => {
                self.status = TaskStatus::Running;
                self.current_stage = Some(stage);
            }
            TaskTransition::StageSucceeded { stage, output } => {
                self.stage_outputs.insert(stage, output);
            }
            TaskTransition::Complete => {
                self.status = TaskStatus::Completed;
                self.output = self.stage_outputs.get(&AgentType::Editor).cloned();
                self.completed_at = Some(now);
            }
            TaskTransition::Fail { stage, message } => {
                self.status = TaskStatus::Failed;
                self.error = Some(TaskError { stage, message });
                self.completed_at = Some(now);
            }
            TaskTransition::TimeOut { stage, message } => {
                self.status = TaskStatus::Timeout;
                self.error = Some(TaskError { stage, message });
                self.completed_at = Some(now);
            }
            TaskTransition::Cancel => {
                self.status = TaskStatus::Canceled;
                self.completed_at = Some(now);
            }
        }
        self.updated_at = now;
        Ok(())
    }
}
