//! Mock implementations for testing
//!
//! Provides scripted stage executors, a mock LLM provider, and config and task
//! stores that can be told to fail writes, so the pipeline can be exercised without
//! a model backend.

use crate::agents::{AgentConfig, AgentType, ConfigStore, InMemoryConfigStore};
use crate::error::{PipelineError, PipelineResult};
use crate::llm::provider::{
    CompletionRequest, CompletionResponse, FinishReason, LlmError, LlmProvider, TokenUsage,
};
use crate::pipeline::{GenerationTask, InMemoryTaskStore, TaskStore, TaskTransition};
use crate::stages::{StageError, StageExecutor, StageInput};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

/// What a [`MockStageExecutor`] does when invoked
#[derive(Debug, Clone)]
pub enum MockStageBehavior {
    /// Return the upstream text with `|<stage>` appended
    Append,
    /// Fail with the given message
    Fail(String),
    /// Sleep, then append
    Delay(Duration),
    /// Wait for the notify handle, then append
    Gate(Arc<Notify>),
    /// Sleep, then fail with the given message
    DelayThenFail(Duration, String),
    /// Panic with the given message
    Panic(String),
}

/// One recorded invocation
#[derive(Debug, Clone, PartialEq)]
pub struct StageCall {
    pub stage: AgentType,
    pub config_id: Uuid,
    pub config_name: String,
    pub previous_output: Option<String>,
}

/// Scripted stage executor that records every call
#[derive(Debug)]
pub struct MockStageExecutor {
    pub behavior: MockStageBehavior,
    pub calls: Arc<Mutex<Vec<StageCall>>>,
    pub finished: Arc<AtomicUsize>,
}

impl MockStageExecutor {
    pub fn new(behavior: MockStageBehavior) -> Self {
        Self {
            behavior,
            calls: Arc::new(Mutex::new(Vec::new())),
            finished: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn appending() -> Self {
        Self::new(MockStageBehavior::Append)
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(MockStageBehavior::Fail(message.into()))
    }

    pub fn delayed(delay: Duration) -> Self {
        Self::new(MockStageBehavior::Delay(delay))
    }

    pub fn failing_after(delay: Duration, message: impl Into<String>) -> Self {
        Self::new(MockStageBehavior::DelayThenFail(delay, message.into()))
    }

    pub fn panicking(message: impl Into<String>) -> Self {
        Self::new(MockStageBehavior::Panic(message.into()))
    }

    /// Executor that blocks until the returned handle is notified
    pub fn gated() -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        (Self::new(MockStageBehavior::Gate(gate.clone())), gate)
    }

    pub async fn get_calls(&self) -> Vec<StageCall> {
        self.calls.lock().await.clone()
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }

    /// Number of invocations that ran to completion
    pub fn finished_count(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    fn append(input: &StageInput) -> String {
        format!("{}|{}", input.upstream_text(), input.stage)
    }
}

#[async_trait]
impl StageExecutor for MockStageExecutor {
    async fn execute(&self, config: &AgentConfig, input: StageInput) -> Result<String, StageError> {
        self.calls.lock().await.push(StageCall {
            stage: input.stage,
            config_id: config.id,
            config_name: config.name.clone(),
            previous_output: input.previous_output.clone(),
        });

        let result = match &self.behavior {
            MockStageBehavior::Append => Ok(Self::append(&input)),
            MockStageBehavior::Fail(message) => Err(StageError::failed(message.clone())),
            MockStageBehavior::Delay(delay) => {
                tokio::time::sleep(*delay).await;
                Ok(Self::append(&input))
            }
            MockStageBehavior::Gate(gate) => {
                gate.notified().await;
                Ok(Self::append(&input))
            }
            MockStageBehavior::DelayThenFail(delay, message) => {
                tokio::time::sleep(*delay).await;
                Err(StageError::failed(message.clone()))
            }
            MockStageBehavior::Panic(message) => panic!("{message}"),
        };

        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Mock LLM provider for testing
#[derive(Debug)]
pub struct MockLlmProvider {
    pub responses: Vec<String>,
    pub current_response: Arc<Mutex<usize>>,
    pub requests: Arc<Mutex<Vec<CompletionRequest>>>,
    pub should_fail: bool,
}

impl MockLlmProvider {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses,
            current_response: Arc::new(Mutex::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            should_fail: false,
        }
    }

    pub fn with_failure() -> Self {
        Self {
            should_fail: true,
            ..Self::new(vec![])
        }
    }

    pub fn single_response(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    pub async fn get_requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LlmProvider for MockLlmProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        self.requests.lock().await.push(request);

        if self.should_fail {
            return Err(LlmError::RequestFailed("Mock LLM failure".to_string()));
        }

        let mut current = self.current_response.lock().await;
        let response_idx = *current % self.responses.len().max(1);
        *current += 1;

        let content = if self.responses.is_empty() {
            "Mock response".to_string()
        } else {
            self.responses[response_idx].clone()
        };

        Ok(CompletionResponse {
            content: Some(content),
            model: "mock-model".to_string(),
            usage: TokenUsage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
            finish_reason: FinishReason::Stop,
            metadata: HashMap::new(),
        })
    }

    async fn health_check(&self) -> Result<(), LlmError> {
        if self.should_fail {
            Err(LlmError::RequestFailed(
                "Mock health check failure".to_string(),
            ))
        } else {
            Ok(())
        }
    }
}

/// Config store whose writes can be made to fail on demand
#[derive(Debug, Default)]
pub struct FlakyConfigStore {
    pub inner: InMemoryConfigStore,
    pub fail_puts: AtomicBool,
}

impl FlakyConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigStore for FlakyConfigStore {
    async fn get(&self, id: Uuid) -> PipelineResult<Option<AgentConfig>> {
        self.inner.get(id).await
    }

    async fn list(
        &self,
        workspace_id: &str,
        agent_type: Option<AgentType>,
    ) -> PipelineResult<Vec<AgentConfig>> {
        self.inner.list(workspace_id, agent_type).await
    }

    async fn find_defaults(
        &self,
        workspace_id: &str,
        agent_type: AgentType,
    ) -> PipelineResult<Vec<AgentConfig>> {
        self.inner.find_defaults(workspace_id, agent_type).await
    }

    async fn put(&self, config: AgentConfig) -> PipelineResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(PipelineError::internal("Mock store write failure"));
        }
        self.inner.put(config).await
    }

    async fn set_default_flag(&self, id: Uuid, is_default: bool) -> PipelineResult<bool> {
        self.inner.set_default_flag(id, is_default).await
    }

    async fn remove(&self, id: Uuid) -> PipelineResult<Option<AgentConfig>> {
        self.inner.remove(id).await
    }
}

/// Task store whose transition writes can be made to fail on demand.
///
/// `apply` calls are numbered from 1 in the order they arrive; calls inside
/// the configured window fail without touching the inner store.
#[derive(Debug, Default)]
pub struct FlakyTaskStore {
    pub inner: InMemoryTaskStore,
    applies: AtomicUsize,
    fail_from: AtomicUsize,
    fail_count: AtomicUsize,
}

impl FlakyTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail `count` consecutive `apply` calls starting with call `first_call`
    pub fn fail_applies(&self, first_call: usize, count: usize) {
        self.fail_from.store(first_call, Ordering::SeqCst);
        self.fail_count.store(count, Ordering::SeqCst);
    }

    pub fn apply_count(&self) -> usize {
        self.applies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskStore for FlakyTaskStore {
    async fn insert(&self, task: GenerationTask) -> PipelineResult<()> {
        self.inner.insert(task).await
    }

    async fn get(&self, id: Uuid) -> PipelineResult<Option<GenerationTask>> {
        self.inner.get(id).await
    }

    async fn apply(&self, id: Uuid, transition: TaskTransition) -> PipelineResult<GenerationTask> {
        let call = self.applies.fetch_add(1, Ordering::SeqCst) + 1;
        let from = self.fail_from.load(Ordering::SeqCst);
        let count = self.fail_count.load(Ordering::SeqCst);
        if from > 0 && call >= from && call < from + count {
            return Err(PipelineError::internal("Mock task store write failure"));
        }
        self.inner.apply(id, transition).await
    }
}
