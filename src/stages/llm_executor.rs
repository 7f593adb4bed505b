//! Stage executor backed by an LLM provider

use crate::agents::{AgentConfig, AgentType};
use crate::llm::provider::{CompletionRequest, LlmProvider, Message};
use crate::stages::executor::{StageError, StageExecutor, StageInput};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

/// Model parameters used when a config does not override them
#[derive(Debug, Clone)]
pub struct LlmStageDefaults {
    pub model: String,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl Default for LlmStageDefaults {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: Some(0.7),
            max_tokens: Some(2000),
        }
    }
}

/// Built-in role prompt for each stage
pub fn role_prompt(stage: AgentType) -> &'static str {
    match stage {
        AgentType::Ideation => {
            "You are an ideation specialist. Propose angles, hooks and a rough \
             outline for the requested piece."
        }
        AgentType::Research => {
            "You are a researcher. Expand the outline with facts, examples and \
             supporting detail relevant to the audience."
        }
        AgentType::Content => {
            "You are a writer. Turn the research notes into a complete draft in \
             the requested tone and format."
        }
        AgentType::Editor => {
            "You are an editor. Polish the draft for clarity, flow and \
             correctness, and return only the final text."
        }
    }
}

/// Runs a stage as a single chat completion
pub struct LlmStageExecutor {
    provider: Arc<dyn LlmProvider>,
    defaults: LlmStageDefaults,
}

impl LlmStageExecutor {
    pub fn new(provider: Arc<dyn LlmProvider>, defaults: LlmStageDefaults) -> Self {
        Self { provider, defaults }
    }

    /// Build the conversation for one stage
    pub fn build_messages(config: &AgentConfig, input: &StageInput) -> Vec<Message> {
        let mut system = role_prompt(input.stage).to_string();
        if let Some(instructions) = &config.instructions {
            system.push_str("\n\n");
            system.push_str(instructions);
        }

        let mut messages = Vec::with_capacity(2 + config.examples.len() * 2);
        messages.push(Message::system(system));
        for example in &config.examples {
            messages.push(Message::user(example.input.clone()));
            messages.push(Message::assistant(example.output.clone()));
        }
        messages.push(Message::user(Self::render_brief(input)));
        messages
    }

    fn render_brief(input: &StageInput) -> String {
        let request = &input.request;
        let mut brief = String::new();
        let _ = writeln!(brief, "Title: {}", request.title);
        let _ = writeln!(brief, "Topic: {}", request.topic);
        let _ = writeln!(brief, "Content type: {}", request.content_type);
        let _ = writeln!(brief, "Tone: {}", request.tone);
        let _ = writeln!(brief, "Target audience: {}", request.target_audience);
        if !request.key_points.is_empty() {
            brief.push_str("Key points:\n");
            for point in &request.key_points {
                let _ = writeln!(brief, "- {point}");
            }
        }
        if let (Some(previous), Some(from)) = (&input.previous_output, input.stage.previous()) {
            let _ = write!(brief, "\nOutput of the {from} stage:\n{previous}");
        }
        brief
    }

    /// Apply recognised `parameters` on top of the defaults
    fn completion_request(&self, config: &AgentConfig, messages: Vec<Message>) -> CompletionRequest {
        let params = &config.parameters;
        let model = params
            .get("model")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.defaults.model.clone());
        let temperature = params
            .get("temperature")
            .and_then(Value::as_f64)
            .map(|t| t as f32)
            .or(self.defaults.temperature);
        let max_tokens = params
            .get("max_tokens")
            .and_then(Value::as_u64)
            .and_then(|t| u32::try_from(t).ok())
            .or(self.defaults.max_tokens);

        let mut metadata = HashMap::new();
        metadata.insert("agent_config_id".to_string(), config.id.to_string());
        metadata.insert("stage".to_string(), config.agent_type.to_string());

        CompletionRequest {
            messages,
            model,
            max_tokens,
            temperature,
            metadata,
        }
    }
}

#[async_trait]
impl StageExecutor for LlmStageExecutor {
    async fn execute(&self, config: &AgentConfig, input: StageInput) -> Result<String, StageError> {
        let messages = Self::build_messages(config, &input);
        let request = self.completion_request(config, messages);
        debug!(
            stage = %input.stage,
            provider = self.provider.name(),
            model = %request.model,
            "Requesting stage completion"
        );

        let response = self.provider.complete(request).await?;
        match response.content.map(|c| c.trim().to_string()) {
            Some(text) if !text.is_empty() => Ok(text),
            _ => Err(StageError::EmptyOutput),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::NewAgentConfig;
    use crate::llm::provider::MessageRole;
    use crate::pipeline::task::{GenerationRequest, StageOverrides};
    use chrono::Utc;
    use tokio::time::Instant;

    fn input(stage: AgentType, previous: Option<&str>) -> StageInput {
        StageInput {
            stage,
            request: Arc::new(GenerationRequest {
                workspace_id: "ws".to_string(),
                topic: "Rust async".to_string(),
                content_type: "blog".to_string(),
                tone: "friendly".to_string(),
                target_audience: "developers".to_string(),
                key_points: vec!["futures are lazy".to_string()],
                title: "Async Rust".to_string(),
                agent_config_overrides: StageOverrides::default(),
            }),
            previous_output: previous.map(str::to_string),
            deadline: Instant::now(),
        }
    }

    fn config(stage: AgentType) -> AgentConfig {
        NewAgentConfig::new("ws", stage, "cfg")
            .with_instructions("Keep it short")
            .with_example("in-1", "out-1")
            .with_example("in-2", "out-2")
            .into_config(Utc::now())
    }

    #[test]
    fn test_messages_layout() {
        let messages = LlmStageExecutor::build_messages(
            &config(AgentType::Content),
            &input(AgentType::Content, Some("notes")),
        );

        assert_eq!(messages.len(), 6);
        assert_eq!(messages[0].role, MessageRole::System);
        assert!(messages[0].content.starts_with(role_prompt(AgentType::Content)));
        assert!(messages[0].content.ends_with("Keep it short"));
        assert_eq!(messages[1].content, "in-1");
        assert_eq!(messages[2].role, MessageRole::Assistant);
        assert_eq!(messages[2].content, "out-1");
        assert_eq!(messages[3].content, "in-2");
        assert_eq!(messages[4].content, "out-2");

        let brief = &messages[5].content;
        assert_eq!(messages[5].role, MessageRole::User);
        assert!(brief.contains("Title: Async Rust"));
        assert!(brief.contains("- futures are lazy"));
        assert!(brief.contains("Output of the research stage:\nnotes"));
    }

    #[test]
    fn test_first_stage_has_no_upstream_section() {
        let messages = LlmStageExecutor::build_messages(
            &config(AgentType::Ideation),
            &input(AgentType::Ideation, None),
        );
        let brief = &messages.last().unwrap().content;
        assert!(!brief.contains("Output of the"));
        assert!(brief.contains("Topic: Rust async"));
    }

    #[test]
    fn test_parameters_override_defaults() {
        let provider = Arc::new(crate::testing::MockLlmProvider::new(vec![]));
        let executor = LlmStageExecutor::new(provider, LlmStageDefaults::default());

        let mut cfg = config(AgentType::Editor);
        cfg.parameters
            .insert("model".to_string(), serde_json::json!("gpt-4o"));
        cfg.parameters
            .insert("max_tokens".to_string(), serde_json::json!(512));
        cfg.parameters
            .insert("unrelated".to_string(), serde_json::json!(true));

        let request = executor.completion_request(&cfg, vec![]);
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.max_tokens, Some(512));
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.metadata["stage"], "editor");
    }
}
