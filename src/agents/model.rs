//! Agent configuration records and the fixed set of pipeline stages

use crate::error::{PipelineError, PipelineResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Pipeline stage an agent configuration applies to
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Ideation,
    Research,
    Content,
    Editor,
}

impl AgentType {
    /// Stages in execution order
    pub const PIPELINE: [AgentType; 4] = [
        AgentType::Ideation,
        AgentType::Research,
        AgentType::Content,
        AgentType::Editor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::Ideation => "ideation",
            AgentType::Research => "research",
            AgentType::Content => "content",
            AgentType::Editor => "editor",
        }
    }

    /// Stage that runs before this one, if any
    pub fn previous(&self) -> Option<AgentType> {
        match self {
            AgentType::Ideation => None,
            AgentType::Research => Some(AgentType::Ideation),
            AgentType::Content => Some(AgentType::Research),
            AgentType::Editor => Some(AgentType::Content),
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ideation" => Ok(AgentType::Ideation),
            "research" => Ok(AgentType::Research),
            "content" => Ok(AgentType::Content),
            "editor" => Ok(AgentType::Editor),
            other => Err(PipelineError::validation(format!(
                "unknown agent type '{other}', expected one of ideation, research, content, editor"
            ))),
        }
    }
}

/// One value per pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageMap<T> {
    pub ideation: T,
    pub research: T,
    pub content: T,
    pub editor: T,
}

impl<T> StageMap<T> {
    /// Build a map by evaluating `f` for each stage in pipeline order
    pub fn from_fn(mut f: impl FnMut(AgentType) -> T) -> Self {
        Self {
            ideation: f(AgentType::Ideation),
            research: f(AgentType::Research),
            content: f(AgentType::Content),
            editor: f(AgentType::Editor),
        }
    }

    pub fn get(&self, stage: AgentType) -> &T {
        match stage {
            AgentType::Ideation => &self.ideation,
            AgentType::Research => &self.research,
            AgentType::Content => &self.content,
            AgentType::Editor => &self.editor,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(&T) -> U) -> StageMap<U> {
        StageMap::from_fn(|stage| f(self.get(stage)))
    }

    pub fn iter(&self) -> impl Iterator<Item = (AgentType, &T)> {
        AgentType::PIPELINE
            .into_iter()
            .map(move |stage| (stage, self.get(stage)))
    }
}

/// Few-shot demonstration attached to a configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamplePair {
    pub input: String,
    pub output: String,
}

/// Named configuration governing one pipeline stage within a workspace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub id: Uuid,
    pub workspace_id: String,
    pub agent_type: AgentType,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Insertion order is preserved and meaningful
    #[serde(default)]
    pub examples: Vec<ExamplePair>,
    /// Opaque to the pipeline; interpreted only by stage executors
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    pub is_default: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentConfig {
    pub fn key(&self) -> DefaultKey {
        DefaultKey::new(self.workspace_id.clone(), self.agent_type)
    }
}

/// The scope within which at most one configuration may be the default
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DefaultKey {
    pub workspace_id: String,
    pub agent_type: AgentType,
}

impl DefaultKey {
    pub fn new(workspace_id: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            agent_type,
        }
    }
}

impl fmt::Display for DefaultKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workspace_id, self.agent_type)
    }
}

/// Payload for creating a configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAgentConfig {
    pub workspace_id: String,
    pub agent_type: AgentType,
    pub name: String,
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub examples: Vec<ExamplePair>,
    #[serde(default)]
    pub parameters: HashMap<String, Value>,
    #[serde(default)]
    pub is_default: bool,
}

impl NewAgentConfig {
    pub fn new(workspace_id: impl Into<String>, agent_type: AgentType, name: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            agent_type,
            name: name.into(),
            instructions: None,
            examples: Vec::new(),
            parameters: HashMap::new(),
            is_default: false,
        }
    }

    pub fn with_default(mut self, is_default: bool) -> Self {
        self.is_default = is_default;
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_example(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.examples.push(ExamplePair {
            input: input.into(),
            output: output.into(),
        });
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.workspace_id.trim().is_empty() {
            return Err(PipelineError::validation("workspace_id is required"));
        }
        validate_name(&self.name)?;
        validate_examples(&self.examples)
    }

    /// Materialize into a stored record with a fresh id
    pub fn into_config(self, now: DateTime<Utc>) -> AgentConfig {
        AgentConfig {
            id: Uuid::new_v4(),
            workspace_id: normalize_workspace_id(&self.workspace_id).to_string(),
            agent_type: self.agent_type,
            name: self.name.trim().to_string(),
            instructions: normalize_instructions(self.instructions),
            examples: self.examples,
            parameters: self.parameters,
            is_default: self.is_default,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update of a configuration. Workspace and stage cannot change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AgentConfigPatch {
    #[serde(default)]
    pub name: Option<String>,
    /// An empty string clears the instructions
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub examples: Option<Vec<ExamplePair>>,
    #[serde(default)]
    pub parameters: Option<HashMap<String, Value>>,
    #[serde(default)]
    pub is_default: Option<bool>,
}

impl AgentConfigPatch {
    pub fn set_default(is_default: bool) -> Self {
        Self {
            is_default: Some(is_default),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        if let Some(examples) = &self.examples {
            validate_examples(examples)?;
        }
        Ok(())
    }

    /// Apply onto `config`, producing the record to persist
    pub fn apply_to(self, mut config: AgentConfig, now: DateTime<Utc>) -> AgentConfig {
        if let Some(name) = self.name {
            config.name = name.trim().to_string();
        }
        if self.instructions.is_some() {
            config.instructions = normalize_instructions(self.instructions);
        }
        if let Some(examples) = self.examples {
            config.examples = examples;
        }
        if let Some(parameters) = self.parameters {
            config.parameters = parameters;
        }
        if let Some(is_default) = self.is_default {
            config.is_default = is_default;
        }
        config.updated_at = now;
        config
    }
}

/// Canonical form of a workspace id; every lookup and write goes through it
pub fn normalize_workspace_id(workspace_id: &str) -> &str {
    workspace_id.trim()
}

fn validate_name(name: &str) -> PipelineResult<()> {
    if name.trim().is_empty() {
        return Err(PipelineError::validation("name must not be empty"));
    }
    Ok(())
}

fn validate_examples(examples: &[ExamplePair]) -> PipelineResult<()> {
    for (index, example) in examples.iter().enumerate() {
        if example.input.trim().is_empty() || example.output.trim().is_empty() {
            return Err(PipelineError::validation(format!(
                "example {index} must have non-empty input and output"
            )));
        }
    }
    Ok(())
}

fn normalize_instructions(instructions: Option<String>) -> Option<String> {
    instructions
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}
