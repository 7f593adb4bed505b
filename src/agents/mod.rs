//! Agent configurations: records, storage and per-stage resolution

pub mod model;
pub mod resolver;
pub mod store;

pub use model::{
    normalize_workspace_id, AgentConfig, AgentConfigPatch, AgentType, DefaultKey, ExamplePair,
    NewAgentConfig, StageMap,
};
pub use resolver::ConfigResolver;
pub use store::{ConfigStore, InMemoryConfigStore};
