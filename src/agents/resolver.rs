//! Agent configuration resolution and default management
//!
//! Every write for a `(workspace, stage)` key runs inside one per-key async
//! mutex. A write that marks a record as default clears the flag on every
//! other record of the key first, then persists the record; if persisting
//! fails the cleared flags are restored before the error is returned.

use crate::agents::model::{
    normalize_workspace_id, AgentConfig, AgentConfigPatch, AgentType, DefaultKey, NewAgentConfig,
};
use crate::agents::store::ConfigStore;
use crate::config_span;
use crate::error::{PipelineError, PipelineResult};
use crate::observability::metrics::metrics;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Default bound on waiting for a per-key write lock
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolves which configuration governs a stage and owns default bookkeeping
pub struct ConfigResolver {
    store: Arc<dyn ConfigStore>,
    key_locks: Mutex<HashMap<DefaultKey, Arc<tokio::sync::Mutex<()>>>>,
    lock_timeout: Duration,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self {
            store,
            key_locks: Mutex::new(HashMap::new()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, lock_timeout: Duration) -> Self {
        self.lock_timeout = lock_timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Pick the configuration for `agent_type`.
    ///
    /// With an explicit id the record must exist, belong to the workspace and
    /// match the stage. Without one, the key's default is returned, or
    /// `NotFound` when no default exists.
    pub async fn resolve(
        &self,
        workspace_id: &str,
        agent_type: AgentType,
        explicit_config_id: Option<Uuid>,
    ) -> PipelineResult<AgentConfig> {
        let workspace_id = normalize_workspace_id(workspace_id);
        if let Some(id) = explicit_config_id {
            let config = self
                .store
                .get(id)
                .await?
                .ok_or_else(|| PipelineError::not_found("agent config", id))?;

            if config.workspace_id != workspace_id {
                return Err(PipelineError::validation(format!(
                    "agent config {id} does not belong to workspace {workspace_id}"
                )));
            }
            if config.agent_type != agent_type {
                return Err(PipelineError::validation(format!(
                    "agent config {id} is a {} config, expected {agent_type}",
                    config.agent_type
                )));
            }
            return Ok(config);
        }

        let mut defaults = self.store.find_defaults(workspace_id, agent_type).await?;
        if defaults.len() > 1 {
            error!(
                workspace_id = %workspace_id,
                agent_type = %agent_type,
                count = defaults.len(),
                "Multiple default agent configs found; using the most recently updated"
            );
            defaults.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        }

        defaults.into_iter().next().ok_or_else(|| {
            PipelineError::not_found(
                "default agent config",
                DefaultKey::new(workspace_id, agent_type),
            )
        })
    }

    pub async fn get(&self, id: Uuid) -> PipelineResult<AgentConfig> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("agent config", id))
    }

    pub async fn list(
        &self,
        workspace_id: &str,
        agent_type: Option<AgentType>,
    ) -> PipelineResult<Vec<AgentConfig>> {
        let workspace_id = normalize_workspace_id(workspace_id);
        if workspace_id.is_empty() {
            return Err(PipelineError::validation("workspace_id is required"));
        }
        self.store.list(workspace_id, agent_type).await
    }

    pub async fn create(&self, new_config: NewAgentConfig) -> PipelineResult<AgentConfig> {
        new_config.validate()?;
        let config = new_config.into_config(Utc::now());
        let key = config.key();

        let _guard = self.lock_key(&key).await?;
        self.persist(config.clone())
            .instrument(config_span!(config_id = %config.id, key = %key))
            .await?;

        info!(
            config_id = %config.id,
            key = %key,
            is_default = config.is_default,
            "Created agent config"
        );
        metrics().config_written();
        Ok(config)
    }

    pub async fn update(&self, id: Uuid, patch: AgentConfigPatch) -> PipelineResult<AgentConfig> {
        patch.validate()?;
        let key = self.get(id).await?.key();

        let _guard = self.lock_key(&key).await?;
        // Re-read under the lock; the record may have changed or vanished.
        let current = self.get(id).await?;
        let updated = patch.apply_to(current, Utc::now());
        self.persist(updated.clone())
            .instrument(config_span!(config_id = %id, key = %key))
            .await?;

        info!(
            config_id = %id,
            key = %key,
            is_default = updated.is_default,
            "Updated agent config"
        );
        metrics().config_written();
        Ok(updated)
    }

    /// Remove a configuration. Deleting a default leaves the key without one.
    pub async fn delete(&self, id: Uuid) -> PipelineResult<AgentConfig> {
        let key = self.get(id).await?.key();

        let _guard = self.lock_key(&key).await?;
        let removed = self
            .store
            .remove(id)
            .await?
            .ok_or_else(|| PipelineError::not_found("agent config", id))?;

        if removed.is_default {
            info!(config_id = %id, key = %key, "Deleted default agent config; key has no default");
        } else {
            debug!(config_id = %id, key = %key, "Deleted agent config");
        }
        Ok(removed)
    }

    /// Write a record while the caller holds the key lock
    async fn persist(&self, config: AgentConfig) -> PipelineResult<()> {
        if !config.is_default {
            return self.store.put(config).await;
        }

        let cleared = self.clear_other_defaults(&config).await?;
        if let Err(e) = self.store.put(config).await {
            warn!(
                error = %e,
                restored = cleared.len(),
                "Persisting default agent config failed; restoring previous defaults"
            );
            self.restore_defaults(&cleared).await;
            return Err(e);
        }
        Ok(())
    }

    async fn clear_other_defaults(&self, config: &AgentConfig) -> PipelineResult<Vec<Uuid>> {
        let others = self
            .store
            .find_defaults(&config.workspace_id, config.agent_type)
            .await?;

        let mut cleared = Vec::new();
        for other in others.into_iter().filter(|other| other.id != config.id) {
            match self.store.set_default_flag(other.id, false).await {
                Ok(_) => cleared.push(other.id),
                Err(e) => {
                    self.restore_defaults(&cleared).await;
                    return Err(e);
                }
            }
        }

        if !cleared.is_empty() {
            debug!(
                config_id = %config.id,
                cleared = ?cleared,
                "Cleared previous default agent configs"
            );
        }
        Ok(cleared)
    }

    async fn restore_defaults(&self, ids: &[Uuid]) {
        for id in ids {
            if let Err(e) = self.store.set_default_flag(*id, true).await {
                error!(config_id = %id, error = %e, "Failed to restore default flag");
            }
        }
    }

    async fn lock_key(&self, key: &DefaultKey) -> PipelineResult<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self
                .key_locks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            locks.entry(key.clone()).or_default().clone()
        };

        tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| {
                metrics().concurrency_conflict();
                warn!(key = %key, timeout = ?self.lock_timeout, "Timed out waiting for config write lock");
                PipelineError::concurrency_conflict(format!(
                    "another write for {key} is in progress; retry the request"
                ))
            })
    }
}
