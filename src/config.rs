//! Service configuration
//!
//! Loaded from a TOML file and validated on load. Secrets are referenced by
//! environment-variable name and resolved when the service starts.

use crate::agents::{DefaultKey, NewAgentConfig};
use crate::pipeline::OrchestratorSettings;
use crate::stages::LlmStageDefaults;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Files tried, in order, when no `--config` is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["pipeline.toml", "config/pipeline.toml"];

/// Provider names accepted in `[llm] provider`
pub const KNOWN_PROVIDERS: [&str; 2] = ["openai", "mock"];

/// Top-level service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub service: ServiceSection,
    #[serde(default)]
    pub http: HttpSection,
    #[serde(default)]
    pub pipeline: PipelineSection,
    pub llm: LlmSection,
    /// Baseline agent configs created at startup
    #[serde(default)]
    pub seed_configs: Vec<NewAgentConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceSection {
    /// Service identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSection {
    /// Wall-clock budget of one generation task
    #[serde(default = "default_max_task_duration_secs")]
    pub max_task_duration_secs: u64,
    /// Also cut off a stage that is still running when the budget expires
    #[serde(default = "default_enforce_stage_deadline")]
    pub enforce_stage_deadline: bool,
    /// How long a config write waits for the key lock
    #[serde(default = "default_lock_timeout_ms")]
    pub default_lock_timeout_ms: u64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_task_duration_secs: default_max_task_duration_secs(),
            enforce_stage_deadline: default_enforce_stage_deadline(),
            default_lock_timeout_ms: default_lock_timeout_ms(),
        }
    }
}

fn default_max_task_duration_secs() -> u64 {
    600
}

fn default_enforce_stage_deadline() -> bool {
    true
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmSection {
    /// Provider name ("openai" or "mock")
    pub provider: String,
    pub model: String,
    /// Environment variable containing the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    pub base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_llm_timeout_secs() -> u64 {
    120
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid service ID format: {0}")]
    InvalidServiceId(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ServiceConfig {
    /// Load and validate configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// First existing file among [`DEFAULT_CONFIG_PATHS`]
    pub fn find_default_file() -> Option<PathBuf> {
        DEFAULT_CONFIG_PATHS
            .iter()
            .map(PathBuf::from)
            .find(|path| path.is_file())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_service_id(&self.service.id)?;

        if self.http.port == 0 {
            return Err(ConfigError::InvalidConfig(
                "http.port must be greater than 0".to_string(),
            ));
        }
        if self.http.host.parse::<IpAddr>().is_err() {
            return Err(ConfigError::InvalidConfig(format!(
                "http.host '{}' is not an IP address",
                self.http.host
            )));
        }
        if self.pipeline.max_task_duration_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "pipeline.max_task_duration_secs must be greater than 0".to_string(),
            ));
        }
        if self.pipeline.default_lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "pipeline.default_lock_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if !KNOWN_PROVIDERS.contains(&self.llm.provider.as_str()) {
            return Err(ConfigError::InvalidConfig(format!(
                "Unknown llm.provider '{}' (expected one of {:?})",
                self.llm.provider, KNOWN_PROVIDERS
            )));
        }
        if let Some(base_url) = &self.llm.base_url {
            let parsed = url::Url::parse(base_url).map_err(|e| {
                ConfigError::InvalidConfig(format!("llm.base_url '{base_url}' is invalid: {e}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidConfig(format!(
                    "llm.base_url '{base_url}' must use http or https"
                )));
            }
        }
        if let Some(temperature) = self.llm.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::InvalidConfig(format!(
                    "llm.temperature {temperature} must be between 0.0 and 2.0"
                )));
            }
        }

        self.validate_seed_configs()
    }

    fn validate_seed_configs(&self) -> Result<(), ConfigError> {
        let mut default_keys = HashSet::new();
        for (index, seed) in self.seed_configs.iter().enumerate() {
            seed.validate().map_err(|e| {
                ConfigError::InvalidConfig(format!("seed_configs[{index}]: {e}"))
            })?;

            let key = DefaultKey::new(seed.workspace_id.trim(), seed.agent_type);
            if seed.is_default && !default_keys.insert(key.clone()) {
                return Err(ConfigError::InvalidConfig(format!(
                    "seed_configs[{index}]: more than one default for {key}"
                )));
            }
        }
        Ok(())
    }

    /// Get LLM API key from environment variable
    pub fn get_llm_api_key(&self) -> Result<String, ConfigError> {
        std::env::var(&self.llm.api_key_env)
            .map_err(|_| ConfigError::EnvVarNotFound(self.llm.api_key_env.clone()))
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.http.host.parse().map_err(|_| {
            ConfigError::InvalidConfig(format!("http.host '{}' is not an IP address", self.http.host))
        })?;
        Ok(SocketAddr::new(ip, self.http.port))
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_task_duration: Duration::from_secs(self.pipeline.max_task_duration_secs),
            enforce_stage_deadline: self.pipeline.enforce_stage_deadline,
        }
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.pipeline.default_lock_timeout_ms)
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    pub fn stage_defaults(&self) -> LlmStageDefaults {
        LlmStageDefaults {
            model: self.llm.model.clone(),
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
        }
    }

    /// Create a test configuration for unit testing
    #[cfg(test)]
    pub fn test_config() -> Self {
        let toml_content = r#"
[service]
id = "test-pipeline"

[llm]
provider = "mock"
model = "mock-model"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

fn validate_service_id(id: &str) -> Result<(), ConfigError> {
    let valid_chars = id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');

    if id.is_empty() || !valid_chars {
        return Err(ConfigError::InvalidServiceId(format!(
            "Service ID '{id}' must match pattern [a-zA-Z0-9._-]+"
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::AgentType;

    #[test]
    fn test_full_config() {
        let toml_content = r#"
[service]
id = "content-pipeline"

[http]
host = "127.0.0.1"
port = 9000

[pipeline]
max_task_duration_secs = 120
enforce_stage_deadline = false
default_lock_timeout_ms = 250

[llm]
provider = "openai"
model = "gpt-4o-mini"
api_key_env = "PIPELINE_TEST_KEY"
base_url = "http://localhost:1234/v1"
temperature = 0.3
max_tokens = 800
timeout_secs = 30

[[seed_configs]]
workspace_id = "demo"
agent_type = "ideation"
name = "Default ideation"
instructions = "Think broadly"
is_default = true

[[seed_configs]]
workspace_id = "demo"
agent_type = "editor"
name = "Strict editor"
parameters = { temperature = 0.1 }
"#;

        let config = ServiceConfig::from_toml_str(toml_content).unwrap();

        assert_eq!(config.service.id, "content-pipeline");
        assert_eq!(config.socket_addr().unwrap().port(), 9000);
        let settings = config.orchestrator_settings();
        assert_eq!(settings.max_task_duration, Duration::from_secs(120));
        assert!(!settings.enforce_stage_deadline);
        assert_eq!(config.lock_timeout(), Duration::from_millis(250));
        assert_eq!(config.llm_timeout(), Duration::from_secs(30));
        assert_eq!(config.stage_defaults().max_tokens, Some(800));
        assert_eq!(config.seed_configs.len(), 2);
        assert_eq!(config.seed_configs[0].agent_type, AgentType::Ideation);
        assert!(config.seed_configs[0].is_default);
        assert!(!config.seed_configs[1].is_default);
        assert_eq!(config.seed_configs[1].parameters["temperature"], 0.1);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = ServiceConfig::test_config();
        config.validate().unwrap();

        assert_eq!(config.http.port, 8080);
        assert_eq!(config.pipeline.max_task_duration_secs, 600);
        assert!(config.pipeline.enforce_stage_deadline);
        assert_eq!(config.lock_timeout(), Duration::from_millis(5000));
        assert_eq!(config.llm.api_key_env, "OPENAI_API_KEY");
        assert_eq!(config.llm.timeout_secs, 120);
        assert!(config.seed_configs.is_empty());
    }

    #[test]
    fn test_invalid_service_id() {
        let mut config = ServiceConfig::test_config();
        config.service.id = "bad id!".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidServiceId(_))
        ));
    }

    #[test]
    fn test_zero_duration_rejected() {
        let mut config = ServiceConfig::test_config();
        config.pipeline.max_task_duration_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = ServiceConfig::test_config();
        config.llm.provider = "anthropic".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("anthropic"));
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let mut config = ServiceConfig::test_config();
        config.llm.base_url = Some("not a url".to_string());
        assert!(config.validate().is_err());

        config.llm.base_url = Some("ftp://models.local/v1".to_string());
        assert!(config.validate().is_err());

        config.llm.base_url = Some("http://127.0.0.1:4000/v1".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duplicate_seed_defaults_rejected() {
        let mut config = ServiceConfig::test_config();
        config.seed_configs = vec![
            NewAgentConfig::new("demo", AgentType::Research, "a").with_default(true),
            NewAgentConfig::new("demo", AgentType::Research, "b").with_default(true),
        ];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("more than one default"));
    }

    #[test]
    fn test_invalid_seed_rejected() {
        let mut config = ServiceConfig::test_config();
        config.seed_configs = vec![NewAgentConfig::new("demo", AgentType::Research, "  ")];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("seed_configs[0]"));
    }

    #[test]
    fn test_missing_api_key_env() {
        let mut config = ServiceConfig::test_config();
        config.llm.api_key_env = "PIPELINE_KEY_THAT_IS_NEVER_SET".to_string();
        assert!(matches!(
            config.get_llm_api_key(),
            Err(ConfigError::EnvVarNotFound(_))
        ));
    }
}
