//! Stage executor seam
//!
//! An executor performs the generation work of one stage. The pipeline treats
//! it as opaque: it receives the stage's configuration and input and returns
//! text or a [`StageError`].

use crate::agents::{AgentConfig, AgentType, StageMap};
use crate::llm::provider::LlmError;
use crate::pipeline::task::GenerationRequest;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;

/// Input handed to a stage executor
#[derive(Debug, Clone)]
pub struct StageInput {
    pub stage: AgentType,
    pub request: Arc<GenerationRequest>,
    /// Output of the preceding stage; `None` for ideation
    pub previous_output: Option<String>,
    /// Wall-clock deadline of the whole task, for executors that honour it
    pub deadline: Instant,
}

impl StageInput {
    /// Text the stage should build on: the previous output, or the topic for
    /// the first stage
    pub fn upstream_text(&self) -> &str {
        self.previous_output
            .as_deref()
            .unwrap_or(self.request.topic.as_str())
    }
}

/// Failure reported by a stage executor
#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),
    #[error("stage produced no output")]
    EmptyOutput,
    #[error("{0}")]
    Provider(#[from] LlmError),
}

impl StageError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        Self::Failed(message.into())
    }
}

/// Performs the work of one pipeline stage
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, config: &AgentConfig, input: StageInput) -> Result<String, StageError>;
}

/// One executor per pipeline stage
#[derive(Clone)]
pub struct StageExecutors {
    executors: StageMap<Arc<dyn StageExecutor>>,
}

impl StageExecutors {
    pub fn new(
        ideation: Arc<dyn StageExecutor>,
        research: Arc<dyn StageExecutor>,
        content: Arc<dyn StageExecutor>,
        editor: Arc<dyn StageExecutor>,
    ) -> Self {
        Self {
            executors: StageMap {
                ideation,
                research,
                content,
                editor,
            },
        }
    }

    /// Use the same executor for every stage
    pub fn uniform(executor: Arc<dyn StageExecutor>) -> Self {
        Self {
            executors: StageMap::from_fn(|_| executor.clone()),
        }
    }

    /// Replace the executor of a single stage
    pub fn with_stage(mut self, stage: AgentType, executor: Arc<dyn StageExecutor>) -> Self {
        let slot = match stage {
            AgentType::Ideation => &mut self.executors.ideation,
            AgentType::Research => &mut self.executors.research,
            AgentType::Content => &mut self.executors.content,
            AgentType::Editor => &mut self.executors.editor,
        };
        *slot = executor;
        self
    }

    pub fn get(&self, stage: AgentType) -> &Arc<dyn StageExecutor> {
        self.executors.get(stage)
    }
}
