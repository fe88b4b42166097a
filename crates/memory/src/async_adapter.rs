use crate::config_store::{ConfigMutation, ConfigStore};
use crate::sqlite_store::{ConfigStoreError, SqliteConfigStore};
use crate::types::{UserConfig, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::error;

/// Async wrapper for the blocking SQLite store.
pub struct AsyncConfigStore {
    inner: Arc<SqliteConfigStore>,
}

impl AsyncConfigStore {
    pub fn new(inner: Arc<SqliteConfigStore>) -> Self {
        Self { inner }
    }

    async fn blocking<T, F>(&self, op: F) -> Result<T, ConfigStoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SqliteConfigStore) -> Result<T, ConfigStoreError> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| ConfigStoreError::Join(e.to_string()))?
    }
}

#[async_trait]
impl ConfigStore for AsyncConfigStore {
    async fn load(&self, user_id: UserId) -> UserConfig {
        match self.blocking(move |store| store.load_user(user_id)).await {
            Ok(config) => config.unwrap_or_default(),
            Err(e) => {
                error!("Failed to load config for user {}: {}", user_id, e);
                UserConfig::default()
            }
        }
    }

    async fn save(&self, user_id: UserId, config: &UserConfig) -> bool {
        let config = config.clone();
        match self
            .blocking(move |store| store.save_user(user_id, &config))
            .await
        {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save config for user {}: {}", user_id, e);
                false
            }
        }
    }

    async fn load_all(&self) -> HashMap<UserId, UserConfig> {
        match self.blocking(|store| store.load_all_users()).await {
            Ok(configs) => configs,
            Err(e) => {
                error!("Failed to load user configs: {}", e);
                HashMap::new()
            }
        }
    }

    async fn update(&self, user_id: UserId, mutation: ConfigMutation) -> Option<UserConfig> {
        match self
            .blocking(move |store| store.update_user(user_id, mutation))
            .await
        {
            Ok(config) => Some(config),
            Err(e) => {
                error!("Failed to update config for user {}: {}", user_id, e);
                None
            }
        }
    }
}
