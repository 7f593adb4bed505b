//! Service bootstrap: wires stores, executors and the HTTP state from config

use crate::agents::{ConfigResolver, InMemoryConfigStore, NewAgentConfig};
use crate::api::AppState;
use crate::config::ServiceConfig;
use crate::error::PipelineResult;
use crate::llm::provider::LlmProvider;
use crate::llm::providers::{OpenAiConfig, OpenAiProvider, DEFAULT_OPENAI_BASE_URL};
use crate::pipeline::{InMemoryTaskStore, PipelineOrchestrator};
use crate::stages::{LlmStageExecutor, StageExecutors};
use crate::testing::MockLlmProvider;
use std::sync::Arc;
use tracing::{info, warn};

/// Create the LLM provider named in `[llm] provider`
pub fn build_provider(config: &ServiceConfig) -> PipelineResult<Arc<dyn LlmProvider>> {
    match config.llm.provider.as_str() {
        "openai" => {
            let provider = OpenAiProvider::new(OpenAiConfig {
                api_key: config.get_llm_api_key()?,
                base_url: config
                    .llm
                    .base_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
                timeout: config.llm_timeout(),
            })?;
            Ok(Arc::new(provider))
        }
        "mock" => {
            warn!("Using the mock LLM provider; stage outputs are canned");
            Ok(Arc::new(MockLlmProvider::new(vec![])))
        }
        other => Err(crate::error::PipelineError::validation(format!(
            "Unsupported LLM provider: {other}"
        ))),
    }
}

/// Build the orchestrator and HTTP state around in-memory stores
pub fn build_state(config: &ServiceConfig, provider: Arc<dyn LlmProvider>) -> AppState {
    let resolver = Arc::new(
        ConfigResolver::new(Arc::new(InMemoryConfigStore::new()))
            .with_lock_timeout(config.lock_timeout()),
    );
    let executor = Arc::new(LlmStageExecutor::new(provider.clone(), config.stage_defaults()));
    let orchestrator = Arc::new(PipelineOrchestrator::new(
        resolver,
        Arc::new(InMemoryTaskStore::new()),
        StageExecutors::uniform(executor),
        config.orchestrator_settings(),
    ));
    AppState::new(config.service.id.clone(), provider, orchestrator)
}

/// Create the configured baseline agent configs
pub async fn seed_configs(
    resolver: &ConfigResolver,
    seeds: &[NewAgentConfig],
) -> PipelineResult<usize> {
    for seed in seeds {
        let created = resolver.create(seed.clone()).await?;
        info!(
            config_id = %created.id,
            key = %created.key(),
            is_default = created.is_default,
            "Seeded agent config"
        );
    }
    Ok(seeds.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentType;

    #[tokio::test]
    async fn test_mock_provider_state_and_seeding() {
        let mut config = ServiceConfig::test_config();
        config.seed_configs = AgentType::PIPELINE
            .iter()
            .map(|stage| NewAgentConfig::new("demo", *stage, "seed").with_default(true))
            .collect();

        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "mock");

        let state = build_state(&config, provider);
        let seeded = seed_configs(&state.resolver, &config.seed_configs)
            .await
            .unwrap();

        assert_eq!(seeded, 4);
        assert_eq!(state.service_id, "test-pipeline");
        let editor = state
            .resolver
            .resolve("demo", AgentType::Editor, None)
            .await
            .unwrap();
        assert_eq!(editor.name, "seed");
    }

    #[test]
    fn test_openai_provider_requires_key() {
        let mut config = ServiceConfig::test_config();
        config.llm.provider = "openai".to_string();
        config.llm.api_key_env = "PIPELINE_APP_TEST_KEY_UNSET".to_string();
        assert!(build_provider(&config).is_err());
    }
}
