use crate::config_store::{ConfigMutation, ConfigStore};
use crate::types::{UserConfig, UserId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Non-durable [`ConfigStore`], used for dry runs and tests.
#[derive(Default)]
pub struct InMemoryConfigStore {
    configs: Mutex<HashMap<UserId, UserConfig>>,
    writes: AtomicUsize,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_configs(configs: HashMap<UserId, UserConfig>) -> Self {
        Self {
            configs: Mutex::new(configs),
            writes: AtomicUsize::new(0),
        }
    }

    /// Number of writes (saves and updates) performed so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for InMemoryConfigStore {
    async fn load(&self, user_id: UserId) -> UserConfig {
        self.configs
            .lock()
            .get(&user_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn save(&self, user_id: UserId, config: &UserConfig) -> bool {
        self.configs.lock().insert(user_id, config.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        true
    }

    async fn load_all(&self) -> HashMap<UserId, UserConfig> {
        self.configs.lock().clone()
    }

    async fn update(&self, user_id: UserId, mutation: ConfigMutation) -> Option<UserConfig> {
        let mut configs = self.configs.lock();
        let config = configs.entry(user_id).or_default();
        mutation(config);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Some(config.clone())
    }
}
