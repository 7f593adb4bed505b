//! Storage seam for agent configurations
//!
//! The store exposes only primitive reads and writes. Keeping the
//! one-default-per-key invariant is the resolver's job, which wraps these
//! primitives in a per-key atomic unit.

use crate::agents::model::{AgentConfig, AgentType};
use crate::error::PipelineResult;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Durable storage of agent configurations
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn get(&self, id: Uuid) -> PipelineResult<Option<AgentConfig>>;

    /// Configurations of a workspace, optionally filtered by stage, oldest first
    async fn list(
        &self,
        workspace_id: &str,
        agent_type: Option<AgentType>,
    ) -> PipelineResult<Vec<AgentConfig>>;

    /// Every configuration flagged as default for the key
    async fn find_defaults(
        &self,
        workspace_id: &str,
        agent_type: AgentType,
    ) -> PipelineResult<Vec<AgentConfig>>;

    /// Insert or replace a configuration by id
    async fn put(&self, config: AgentConfig) -> PipelineResult<()>;

    /// Set the default flag of one record. Returns false if the id is unknown.
    async fn set_default_flag(&self, id: Uuid, is_default: bool) -> PipelineResult<bool>;

    async fn remove(&self, id: Uuid) -> PipelineResult<Option<AgentConfig>>;
}

/// In-memory configuration store
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    configs: RwLock<HashMap<Uuid, AgentConfig>>,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.configs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.configs.read().await.is_empty()
    }
}

fn sort_oldest_first(configs: &mut [AgentConfig]) {
    configs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn get(&self, id: Uuid) -> PipelineResult<Option<AgentConfig>> {
        Ok(self.configs.read().await.get(&id).cloned())
    }

    async fn list(
        &self,
        workspace_id: &str,
        agent_type: Option<AgentType>,
    ) -> PipelineResult<Vec<AgentConfig>> {
        let configs = self.configs.read().await;
        let mut matching: Vec<AgentConfig> = configs
            .values()
            .filter(|c| c.workspace_id == workspace_id)
            .filter(|c| agent_type.map_or(true, |t| c.agent_type == t))
            .cloned()
            .collect();
        sort_oldest_first(&mut matching);
        Ok(matching)
    }

    async fn find_defaults(
        &self,
        workspace_id: &str,
        agent_type: AgentType,
    ) -> PipelineResult<Vec<AgentConfig>> {
        let configs = self.configs.read().await;
        let mut defaults: Vec<AgentConfig> = configs
            .values()
            .filter(|c| c.is_default && c.workspace_id == workspace_id && c.agent_type == agent_type)
            .cloned()
            .collect();
        sort_oldest_first(&mut defaults);
        Ok(defaults)
    }

    async fn put(&self, config: AgentConfig) -> PipelineResult<()> {
        self.configs.write().await.insert(config.id, config);
        Ok(())
    }

    async fn set_default_flag(&self, id: Uuid, is_default: bool) -> PipelineResult<bool> {
        let mut configs = self.configs.write().await;
        match configs.get_mut(&id) {
            Some(config) => {
                config.is_default = is_default;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn remove(&self, id: Uuid) -> PipelineResult<Option<AgentConfig>> {
        Ok(self.configs.write().await.remove(&id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::model::NewAgentConfig;
    use chrono::{Duration, Utc};

    fn config(workspace: &str, agent_type: AgentType, is_default: bool) -> AgentConfig {
        NewAgentConfig::new(workspace, agent_type, "cfg")
            .with_default(is_default)
            .into_config(Utc::now())
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store = InMemoryConfigStore::new();
        let cfg = config("ws", AgentType::Ideation, false);

        store.put(cfg.clone()).await.unwrap();

        assert_eq!(store.get(cfg.id).await.unwrap(), Some(cfg));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_list_filters_by_workspace_and_type() {
        let store = InMemoryConfigStore::new();
        store.put(config("ws", AgentType::Ideation, false)).await.unwrap();
        store.put(config("ws", AgentType::Editor, false)).await.unwrap();
        store.put(config("other", AgentType::Ideation, false)).await.unwrap();

        assert_eq!(store.list("ws", None).await.unwrap().len(), 2);
        assert_eq!(
            store.list("ws", Some(AgentType::Editor)).await.unwrap().len(),
            1
        );
        assert!(store.list("missing", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_orders_oldest_first() {
        let store = InMemoryConfigStore::new();
        let mut newer = config("ws", AgentType::Content, false);
        let mut older = config("ws", AgentType::Content, false);
        older.created_at = Utc::now() - Duration::minutes(5);
        newer.created_at = Utc::now();
        store.put(newer.clone()).await.unwrap();
        store.put(older.clone()).await.unwrap();

        let listed = store.list("ws", None).await.unwrap();
        assert_eq!(listed[0].id, older.id);
        assert_eq!(listed[1].id, newer.id);
    }

    #[tokio::test]
    async fn test_find_defaults_and_set_flag() {
        let store = InMemoryConfigStore::new();
        let cfg = config("ws", AgentType::Research, true);
        store.put(cfg.clone()).await.unwrap();

        assert_eq!(
            store.find_defaults("ws", AgentType::Research).await.unwrap().len(),
            1
        );
        assert!(store.set_default_flag(cfg.id, false).await.unwrap());
        assert!(store
            .find_defaults("ws", AgentType::Research)
            .await
            .unwrap()
            .is_empty());
        assert!(!store.set_default_flag(Uuid::new_v4(), true).await.unwrap());
    }

    #[tokio::test]
    async fn test_remove() {
        let store = InMemoryConfigStore::new();
        let cfg = config("ws", AgentType::Editor, false);
        store.put(cfg.clone()).await.unwrap();

        assert!(store.remove(cfg.id).await.unwrap().is_some());
        assert!(store.remove(cfg.id).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }
}
