//! LLM-backed stages running through the orchestrator with a mock provider


use content_pipeline::agents::{AgentConfigPatch, AgentType};
use content_pipeline::llm::provider::MessageRole;
use content_pipeline::pipeline::{OrchestratorSettings, TaskStatus};
use content_pipeline::stages::{LlmStageDefaults, LlmStageExecutor, StageExecutors};
use content_pipeline::testing::MockLlmProvider;
use std::sync::Arc;
use test_helpers::*;

fn executors(provider: Arc<MockLlmProvider>) -> StageExecutors {
    StageExecutors::uniform(Arc::new(LlmStageExecutor::new(
        provider,
        LlmStageDefaults::default(),
    )))
}

#[tokio::test]
async fn test_each_stage_sees_previous_stage_output() {
    let resolver = resolver();
    let defaults = seed_defaults(&resolver).await;
    resolver
        .update(
            defaults.research.id,
            AgentConfigPatch {
                instructions: Some("Cite two sources".to_string()),
                parameters: Some(
                    [("model".to_string(), serde_json::json!("research-model"))]
                        .into_iter()
                        .collect(),
                ),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let provider = Arc::new(MockLlmProvider::new(vec![
        "angles".to_string(),
        "facts".to_string(),
        "draft".to_string(),
        "  polished  ".to_string(),
    ]));
    let (orchestrator, poller) = orchestrator(
        resolver,
        executors(provider.clone()),
        OrchestratorSettings::default(),
    );

    let task_id = orchestrator
        .submit(generation_request("tide pools"))
        .await
        .unwrap();
    let view = wait_for_terminal(&poller, task_id).await;

    assert_eq!(view.status, TaskStatus::Completed);
    assert_eq!(view.output.as_deref(), Some("polished"));

    let requests = provider.get_requests().await;
    assert_eq!(requests.len(), 4);

    let ideation_brief = &requests[0].messages.last().unwrap().content;
    assert!(ideation_brief.contains("Topic: tide pools"));
    assert!(!ideation_brief.contains("Output of the"));

    let research = &requests[1];
    assert_eq!(research.model, "research-model");
    assert!(research.messages[0].content.ends_with("Cite two sources"));
    assert!(research.messages.last().unwrap().content.contains("Output of the ideation stage:\nangles"));
    assert_eq!(research.metadata.get("stage").map(String::as_str), Some("research"));

    let editor = &requests[3];
    assert_eq!(editor.model, "gpt-4o-mini");
    assert_eq!(editor.messages.last().unwrap().role, MessageRole::User);
    assert!(editor.messages.last().unwrap().content.contains("draft"));
}

#[tokio::test]
async fn test_blank_completion_fails_the_stage() {
    let resolver = resolver();
    seed_defaults(&resolver).await;
    let provider = Arc::new(MockLlmProvider::new(vec!["angles".to_string(), "   ".to_string()]));
    let (orchestrator, poller) = orchestrator(
        resolver,
        executors(provider),
        OrchestratorSettings::default(),
    );

    let task_id = orchestrator
        .submit(generation_request("empty"))
        .await
        .unwrap();
    let view = wait_for_terminal(&poller, task_id).await;

    assert_eq!(view.status, TaskStatus::Failed);
    let error = view.error.unwrap();
    assert_eq!(error.stage, AgentType::Research);
    assert_eq!(view.partial_outputs.get(&AgentType::Ideation).map(String::as_str), Some("angles"));
    assert!(view.output.is_none());
}

#[tokio::test]
async fn test_provider_failure_fails_first_stage() {
    let resolver = resolver();
    seed_defaults(&resolver).await;
    let provider = Arc::new(MockLlmProvider::with_failure());
    let (orchestrator, poller) = orchestrator(
        resolver,
        executors(provider.clone()),
        OrchestratorSettings::default(),
    );

    let task_id = orchestrator
        .submit(generation_request("offline"))
        .await
        .unwrap();
    let view = wait_for_terminal(&poller, task_id).await;

    assert_eq!(view.status, TaskStatus::Failed);
    let error = view.error.unwrap();
    assert_eq!(error.stage, AgentType::Ideation);
    assert!(error.message.contains("Mock LLM failure"));
    assert_eq!(provider.get_requests().await.len(), 1);
}
