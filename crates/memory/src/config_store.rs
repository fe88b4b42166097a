use crate::types::{UserConfig, UserId};
use async_trait::async_trait;
use std::collections::HashMap;

/// Read-modify-write step applied atomically by [`ConfigStore::update`].
pub type ConfigMutation = Box<dyn FnOnce(&mut UserConfig) + Send>;

/// Durable per-user configuration.
///
/// Callers never see storage errors: implementations log them and fall back to
/// an empty config (reads) or report `false` (writes).
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Stored config for `user_id`, or a default one.
    async fn load(&self, user_id: UserId) -> UserConfig;

    async fn save(&self, user_id: UserId, config: &UserConfig) -> bool;

    async fn load_all(&self) -> HashMap<UserId, UserConfig>;

    /// Loads, mutates and persists in one step. Returns the new config, or
    /// `None` when it could not be persisted.
    async fn update(&self, user_id: UserId, mutation: ConfigMutation) -> Option<UserConfig>;
}
