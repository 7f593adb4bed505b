//! Integration tests for agent config management and resolution


use chrono::{Duration as ChronoDuration, Utc};
use content_pipeline::agents::{
    AgentConfigPatch, AgentType, ConfigResolver, ConfigStore, NewAgentConfig,
};
use content_pipeline::error::PipelineError;
use content_pipeline::testing::FlakyConfigStore;
use std::sync::Arc;
use test_helpers::*;

#[tokio::test]
async fn test_failed_default_write_restores_previous_default() {
    let store = Arc::new(FlakyConfigStore::new());
    let resolver = ConfigResolver::new(store.clone());
    let original = resolver
        .create(NewAgentConfig::new(WORKSPACE, AgentType::Editor, "original").with_default(true))
        .await
        .unwrap();

    store.set_fail_puts(true);
    let err = resolver
        .create(NewAgentConfig::new(WORKSPACE, AgentType::Editor, "replacement").with_default(true))
        .await
        .unwrap_err();
    store.set_fail_puts(false);

    assert!(matches!(err, PipelineError::Internal { .. }));
    let resolved = resolver
        .resolve(WORKSPACE, AgentType::Editor, None)
        .await
        .unwrap();
    assert_eq!(resolved.id, original.id);
    assert_eq!(default_count(&resolver, WORKSPACE, AgentType::Editor).await, 1);
    assert_eq!(
        resolver
            .list(WORKSPACE, Some(AgentType::Editor))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn test_failed_default_update_keeps_record_and_default() {
    let store = Arc::new(FlakyConfigStore::new());
    let resolver = ConfigResolver::new(store.clone());
    let current = resolver
        .create(NewAgentConfig::new(WORKSPACE, AgentType::Research, "current").with_default(true))
        .await
        .unwrap();
    let candidate = resolver
        .create(NewAgentConfig::new(WORKSPACE, AgentType::Research, "candidate"))
        .await
        .unwrap();

    store.set_fail_puts(true);
    assert!(resolver
        .update(candidate.id, AgentConfigPatch::set_default(true))
        .await
        .is_err());
    store.set_fail_puts(false);

    assert!(resolver.get(current.id).await.unwrap().is_default);
    assert!(!resolver.get(candidate.id).await.unwrap().is_default);
}

#[tokio::test]
async fn test_list_filters_by_stage_in_creation_order() {
    let resolver = resolver();
    for name in ["first", "second"] {
        resolver
            .create(NewAgentConfig::new(WORKSPACE, AgentType::Ideation, name))
            .await
            .unwrap();
        // Keep creation timestamps distinct
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    resolver
        .create(NewAgentConfig::new(WORKSPACE, AgentType::Editor, "editor"))
        .await
        .unwrap();
    resolver
        .create(NewAgentConfig::new("other", AgentType::Ideation, "elsewhere"))
        .await
        .unwrap();

    let ideation = resolver
        .list(WORKSPACE, Some(AgentType::Ideation))
        .await
        .unwrap();
    let names: Vec<&str> = ideation.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["first", "second"]);

    assert_eq!(resolver.list(WORKSPACE, None).await.unwrap().len(), 3);
    assert!(matches!(
        resolver.list(" ", None).await.unwrap_err(),
        PipelineError::Validation { .. }
    ));
}

#[tokio::test]
async fn test_update_applies_fields_and_bumps_timestamp() {
    let resolver = resolver();
    let created = resolver
        .create(
            NewAgentConfig::new(WORKSPACE, AgentType::Content, "writer")
                .with_instructions("Be concise")
                .with_parameter("temperature", serde_json::json!(0.4)),
        )
        .await
        .unwrap();

    let updated = resolver
        .update(
            created.id,
            AgentConfigPatch {
                instructions: Some("Be thorough".to_string()),
                examples: Some(vec![]),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.id, created.id);
    assert_eq!(updated.name, "writer");
    assert_eq!(updated.instructions.as_deref(), Some("Be thorough"));
    assert_eq!(updated.parameters["temperature"], 0.4);
    assert_eq!(updated.created_at, created.created_at);
    assert!(updated.updated_at >= created.updated_at);
}

#[test]
fn test_patch_cannot_change_workspace_or_stage() {
    let result = serde_json::from_value::<AgentConfigPatch>(serde_json::json!({
        "workspace_id": "elsewhere",
        "name": "moved"
    }));
    assert!(result.is_err());

    let result = serde_json::from_value::<AgentConfigPatch>(serde_json::json!({
        "agent_type": "editor"
    }));
    assert!(result.is_err());
}

#[tokio::test]
async fn test_resolve_prefers_latest_of_duplicate_defaults() {
    let resolver = resolver();
    let now = Utc::now();

    // Write two defaults straight to the store, bypassing the resolver
    let older = NewAgentConfig::new(WORKSPACE, AgentType::Ideation, "older")
        .with_default(true)
        .into_config(now - ChronoDuration::minutes(5));
    let newer = NewAgentConfig::new(WORKSPACE, AgentType::Ideation, "newer")
        .with_default(true)
        .into_config(now);
    resolver.store().put(older).await.unwrap();
    resolver.store().put(newer.clone()).await.unwrap();

    let resolved = resolver
        .resolve(WORKSPACE, AgentType::Ideation, None)
        .await
        .unwrap();
    assert_eq!(resolved.id, newer.id);
}

#[tokio::test]
async fn test_explicit_resolution_ignores_default_flag() {
    let resolver = resolver();
    let defaults = seed_defaults(&resolver).await;
    let explicit = resolver
        .create(NewAgentConfig::new(WORKSPACE, AgentType::Research, "explicit"))
        .await
        .unwrap();

    let resolved = resolver
        .resolve(WORKSPACE, AgentType::Research, Some(explicit.id))
        .await
        .unwrap();
    assert_eq!(resolved.id, explicit.id);

    let err = resolver
        .resolve(WORKSPACE, AgentType::Editor, Some(defaults.research.id))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation { .. }));
}

#[tokio::test]
async fn test_create_validation_errors() {
    let resolver = resolver();

    let err = resolver
        .create(NewAgentConfig::new("", AgentType::Editor, "x"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("workspace_id"));

    let err = resolver
        .create(NewAgentConfig::new(WORKSPACE, AgentType::Editor, "x").with_example("", "out"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Validation { .. }));
}
