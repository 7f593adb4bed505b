//! Pipeline orchestrator
//!
//! `submit` validates a request, resolves and snapshots the four stage
//! configurations, records a queued task and hands the run loop to a
//! background tokio task. The run loop walks the stages in order, threading
//! each output into the next stage, and commits every transition to the
//! [`TaskStore`]. Cancellation and the task deadline are checked at stage
//! boundaries; the deadline can additionally be enforced while a stage runs.

use crate::agents::{normalize_workspace_id, AgentConfig, AgentType, ConfigResolver, StageMap};
use crate::error::{sanitize_error_message, PipelineError, PipelineResult};
use crate::observability::metrics::metrics;
use crate::pipeline::task::{GenerationRequest, GenerationTask, TaskStatus, TaskTransition};
use crate::pipeline::task_store::TaskStore;
use crate::stages::{StageError, StageExecutors, StageInput};
use crate::{stage_span, task_span};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Default maximum wall-clock duration of one task
pub const DEFAULT_MAX_TASK_DURATION: Duration = Duration::from_secs(600);

type CancellationRegistry = Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>;

/// Runtime policy of the orchestrator
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorSettings {
    /// Measured from submission; exceeding it ends the task in `timeout`
    pub max_task_duration: Duration,
    /// Race each stage against the task deadline instead of waiting for the
    /// next stage boundary
    pub enforce_stage_deadline: bool,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_task_duration: DEFAULT_MAX_TASK_DURATION,
            enforce_stage_deadline: true,
        }
    }
}

/// Accepts generation requests and drives them through the four stages
pub struct PipelineOrchestrator {
    resolver: Arc<ConfigResolver>,
    tasks: Arc<dyn TaskStore>,
    executors: StageExecutors,
    settings: OrchestratorSettings,
    cancellations: CancellationRegistry,
}

impl PipelineOrchestrator {
    pub fn new(
        resolver: Arc<ConfigResolver>,
        tasks: Arc<dyn TaskStore>,
        executors: StageExecutors,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            resolver,
            tasks,
            executors,
            settings,
            cancellations: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn resolver(&self) -> &Arc<ConfigResolver> {
        &self.resolver
    }

    pub fn tasks(&self) -> &Arc<dyn TaskStore> {
        &self.tasks
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Number of tasks whose run loop has not finished yet
    pub fn active_tasks(&self) -> usize {
        lock_registry(&self.cancellations).len()
    }

    /// Accept a request and start it in the background.
    ///
    /// Returns as soon as the task is recorded; stage execution never blocks
    /// the caller. Validation failures, including a stage with neither an
    /// override nor a default, are returned here and no task is created.
    pub async fn submit(&self, mut request: GenerationRequest) -> PipelineResult<Uuid> {
        request.workspace_id = normalize_workspace_id(&request.workspace_id).to_string();
        let configs = match self.prepare(&request).await {
            Ok(configs) => configs,
            Err(e) => {
                metrics().submission_rejected();
                warn!(workspace_id = %request.workspace_id, error = %e, "Rejected generation request");
                return Err(e);
            }
        };

        let task = GenerationTask::new(request, configs.map(|config| config.id));
        let task_id = task.id;
        let workspace_id = task.workspace_id.clone();
        let request = Arc::new(task.request.clone());

        let submitted_at = Instant::now();
        self.tasks.insert(task).await?;

        let cancel = Arc::new(AtomicBool::new(false));
        lock_registry(&self.cancellations).insert(task_id, cancel.clone());

        let run = PipelineRun {
            task_id,
            request,
            configs,
            tasks: self.tasks.clone(),
            executors: self.executors.clone(),
            cancel,
            deadline: submitted_at + self.settings.max_task_duration,
            settings: self.settings.clone(),
            cancellations: self.cancellations.clone(),
        };
        let span = task_span!(task_id = %task_id, workspace_id = %workspace_id);
        tokio::spawn(run.execute().instrument(span));

        metrics().task_submitted();
        info!(task_id = %task_id, workspace_id = %workspace_id, "Generation task queued");
        Ok(task_id)
    }

    /// Request cancellation. Takes effect at the next stage boundary.
    ///
    /// Returns `false` when the task has already reached a terminal state.
    pub async fn cancel(&self, task_id: Uuid) -> PipelineResult<bool> {
        let task = self
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("task", task_id))?;

        if task.status.is_terminal() {
            debug!(task_id = %task_id, status = %task.status, "Cancel ignored for terminal task");
            return Ok(false);
        }

        let flag = lock_registry(&self.cancellations).get(&task_id).cloned();
        match flag {
            Some(flag) => {
                flag.store(true, Ordering::SeqCst);
                info!(task_id = %task_id, "Cancellation requested");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn prepare(&self, request: &GenerationRequest) -> PipelineResult<StageMap<AgentConfig>> {
        request.validate()?;

        Ok(StageMap {
            ideation: self.resolve_stage(request, AgentType::Ideation).await?,
            research: self.resolve_stage(request, AgentType::Research).await?,
            content: self.resolve_stage(request, AgentType::Content).await?,
            editor: self.resolve_stage(request, AgentType::Editor).await?,
        })
    }

    async fn resolve_stage(
        &self,
        request: &GenerationRequest,
        stage: AgentType,
    ) -> PipelineResult<AgentConfig> {
        let explicit = request.agent_config_overrides.get(stage);
        match self
            .resolver
            .resolve(&request.workspace_id, stage, explicit)
            .await
        {
            Ok(config) => Ok(config),
            Err(e) if e.is_not_found() => Err(match explicit {
                Some(id) => PipelineError::validation(format!(
                    "{stage} override references unknown agent config {id}"
                )),
                None => PipelineError::validation(format!(
                    "no agent config for stage {stage}: workspace {} has no default and no override was given",
                    request.workspace_id
                )),
            }),
            Err(e) => Err(e),
        }
    }
}

fn lock_registry(
    registry: &CancellationRegistry,
) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<AtomicBool>>> {
    registry
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Everything the background run loop needs, captured at submission
struct PipelineRun {
    task_id: Uuid,
    request: Arc<GenerationRequest>,
    configs: StageMap<AgentConfig>,
    tasks: Arc<dyn TaskStore>,
    executors: StageExecutors,
    cancel: Arc<AtomicBool>,
    deadline: Instant,
    settings: OrchestratorSettings,
    cancellations: CancellationRegistry,
}

/// Drops the task's cancellation entry when the run loop ends, including
/// when it unwinds
struct Registration {
    registry: CancellationRegistry,
    task_id: Uuid,
}

impl Drop for Registration {
    fn drop(&mut self) {
        lock_registry(&self.registry).remove(&self.task_id);
    }
}

/// How a spawned stage call ended
enum StageOutcome {
    Finished(Result<String, StageError>),
    /// Still running at the task deadline; the call was aborted
    DeadlineHit,
    /// The executor panicked or its task was aborted
    Crashed(String),
}

impl PipelineRun {
    async fn execute(self) {
        let _registration = Registration {
            registry: self.cancellations.clone(),
            task_id: self.task_id,
        };
        let started = Instant::now();
        let final_status = self.drive().await;
        let elapsed = started.elapsed();

        match final_status {
            Some(TaskStatus::Completed) => metrics().task_completed(elapsed),
            Some(TaskStatus::Failed) => metrics().task_failed(elapsed),
            Some(TaskStatus::Timeout) => metrics().task_timed_out(elapsed),
            Some(TaskStatus::Canceled) => metrics().task_canceled(elapsed),
            Some(other) => error!(status = %other, "Run loop ended in a non-terminal state"),
            None => error!("Run loop aborted because a task transition could not be stored"),
        }

        info!(status = ?final_status, elapsed_ms = elapsed.as_millis() as u64, "Generation task finished");
    }

    /// Walk the stages; returns the terminal status that was committed
    async fn drive(&self) -> Option<TaskStatus> {
        let mut previous_output: Option<String> = None;

        for stage in AgentType::PIPELINE {
            if self.cancel.load(Ordering::SeqCst) {
                info!(next_stage = %stage, "Cancellation observed at stage boundary");
                return self.finish(TaskTransition::Cancel).await;
            }
            if self.deadline_passed() {
                return self.time_out(stage).await;
            }

            if self.commit(TaskTransition::StartStage(stage)).await.is_none() {
                return self.abandon(stage, "could not record stage start").await;
            }

            let input = StageInput {
                stage,
                request: self.request.clone(),
                previous_output: previous_output.take(),
                deadline: self.deadline,
            };

            let stage_started = Instant::now();
            let outcome = self.run_stage(stage, input).await;
            let stage_elapsed = stage_started.elapsed();

            let result = match outcome {
                StageOutcome::Finished(result) => result,
                StageOutcome::DeadlineHit => {
                    metrics().stage_timed_out(stage);
                    warn!(stage = %stage, "Stage still running at task deadline");
                    return self.time_out(stage).await;
                }
                StageOutcome::Crashed(message) => {
                    metrics().stage_executed(stage, stage_elapsed, false);
                    error!(stage = %stage, error = %message, "Stage executor crashed");
                    return self.fail(stage, &message).await;
                }
            };

            metrics().stage_executed(stage, stage_elapsed, result.is_ok());
            if self.deadline_passed() {
                warn!(stage = %stage, ok = result.is_ok(), "Discarding stage result produced after the task deadline");
                return self.time_out(stage).await;
            }

            match result {
                Ok(output) => {
                    debug!(
                        stage = %stage,
                        output_len = output.len(),
                        elapsed_ms = stage_elapsed.as_millis() as u64,
                        "Stage completed"
                    );
                    let recorded = self
                        .commit(TaskTransition::StageSucceeded {
                            stage,
                            output: output.clone(),
                        })
                        .await;
                    if recorded.is_none() {
                        return self.abandon(stage, "could not record stage output").await;
                    }
                    previous_output = Some(output);
                }
                Err(e) => {
                    warn!(stage = %stage, error = %e, "Stage failed");
                    return self.fail(stage, &e.to_string()).await;
                }
            }
        }

        self.finish(TaskTransition::Complete).await
    }

    /// Run one stage on its own tokio task so a panicking executor cannot
    /// take the run loop down with it
    async fn run_stage(&self, stage: AgentType, input: StageInput) -> StageOutcome {
        let executor = self.executors.get(stage).clone();
        let config = self.configs.get(stage).clone();
        let span = stage_span!(stage = %stage, config_id = %config.id);
        let mut handle =
            tokio::spawn(async move { executor.execute(&config, input).await }.instrument(span));

        let joined = if self.settings.enforce_stage_deadline {
            match tokio::time::timeout_at(self.deadline, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    handle.abort();
                    return StageOutcome::DeadlineHit;
                }
            }
        } else {
            (&mut handle).await
        };

        match joined {
            Ok(result) => StageOutcome::Finished(result),
            Err(e) if e.is_panic() => {
                StageOutcome::Crashed(format!("stage executor panicked: {}", panic_message(e)))
            }
            Err(e) => StageOutcome::Crashed(format!("stage executor did not finish: {e}")),
        }
    }

    fn deadline_passed(&self) -> bool {
        Instant::now() > self.deadline
    }

    async fn time_out(&self, stage: AgentType) -> Option<TaskStatus> {
        let error = PipelineError::timeout(stage, self.settings.max_task_duration);
        warn!(stage = %stage, "{}", error);
        self.finish(TaskTransition::TimeOut {
            stage,
            message: error.to_string(),
        })
        .await
    }

    async fn fail(&self, stage: AgentType, message: &str) -> Option<TaskStatus> {
        self.finish(TaskTransition::Fail {
            stage,
            message: sanitize_error_message(message),
        })
        .await
    }

    /// A non-terminal transition could not be stored: make one attempt to
    /// leave the task failed rather than stuck mid-pipeline
    async fn abandon(&self, stage: AgentType, reason: &str) -> Option<TaskStatus> {
        error!(stage = %stage, reason, "Abandoning task after a failed state write");
        self.commit(TaskTransition::Fail {
            stage,
            message: format!("task state {reason}"),
        })
        .await
        .map(|task| task.status)
    }

    /// Commit a terminal transition, retrying once on a failed write
    async fn finish(&self, transition: TaskTransition) -> Option<TaskStatus> {
        if let Some(task) = self.commit(transition.clone()).await {
            return Some(task.status);
        }
        warn!(transition = %transition, "Retrying terminal transition");
        self.commit(transition).await.map(|task| task.status)
    }

    async fn commit(&self, transition: TaskTransition) -> Option<GenerationTask> {
        match self.tasks.apply(self.task_id, transition).await {
            Ok(task) => Some(task),
            Err(e) => {
                error!(error = %e, "Failed to store task transition");
                None
            }
        }
    }
}

fn panic_message(error: JoinError) -> String {
    let payload = error.into_panic();
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{InMemoryConfigStore, NewAgentConfig};
    use crate::pipeline::task::StageOverrides;
    use crate::pipeline::task_store::InMemoryTaskStore;
    use crate::testing::mocks::MockStageExecutor;

    async fn setup(with_defaults: &[AgentType]) -> (PipelineOrchestrator, Arc<ConfigResolver>) {
        let resolver = Arc::new(ConfigResolver::new(Arc::new(InMemoryConfigStore::new())));
        for stage in with_defaults {
            resolver
                .create(NewAgentConfig::new("ws", *stage, format!("{stage} default")).with_default(true))
                .await
                .unwrap();
        }
        let orchestrator = PipelineOrchestrator::new(
            resolver.clone(),
            Arc::new(InMemoryTaskStore::new()),
            StageExecutors::uniform(Arc::new(MockStageExecutor::appending())),
            OrchestratorSettings::default(),
        );
        (orchestrator, resolver)
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            workspace_id: "ws".to_string(),
            topic: "x".to_string(),
            content_type: "blog".to_string(),
            tone: "calm".to_string(),
            target_audience: "devs".to_string(),
            key_points: vec![],
            title: "T".to_string(),
            agent_config_overrides: StageOverrides::default(),
        }
    }

    #[tokio::test]
    async fn test_submit_snapshots_resolved_config_ids() {
        let (orchestrator, resolver) = setup(&AgentType::PIPELINE).await;

        let task_id = orchestrator.submit(request()).await.unwrap();
        let task = orchestrator.tasks().get(task_id).await.unwrap().unwrap();

        for stage in AgentType::PIPELINE {
            let expected = resolver.resolve("ws", stage, None).await.unwrap().id;
            assert_eq!(*task.stage_configs.get(stage), expected);
        }
    }

    #[tokio::test]
    async fn test_submit_names_stage_without_default() {
        let (orchestrator, _) = setup(&[AgentType::Ideation, AgentType::Research]).await;

        let err = orchestrator.submit(request()).await.unwrap_err();

        assert!(matches!(err, PipelineError::Validation { .. }));
        assert!(err.to_string().contains("content"));
    }

    #[tokio::test]
    async fn test_submit_rejects_unknown_override() {
        let (orchestrator, _) = setup(&AgentType::PIPELINE).await;
        let mut req = request();
        req.agent_config_overrides.editor = Some(Uuid::new_v4());

        let err = orchestrator.submit(req).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation { .. }));
        assert!(err.to_string().contains("editor"));
    }

    #[tokio::test]
    async fn test_submit_rejects_missing_fields_before_resolving() {
        let (orchestrator, _) = setup(&[]).await;
        let mut req = request();
        req.title = String::new();

        let err = orchestrator.submit(req).await.unwrap_err();
        assert!(err.to_string().contains("title"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_task_is_not_found() {
        let (orchestrator, _) = setup(&[]).await;
        assert!(orchestrator
            .cancel(Uuid::new_v4())
            .await
            .unwrap_err()
            .is_not_found());
    }
}
