//! State shared by the AutoDL tools: collaborators plus the user the current
//! function-calling round acts for.

use crate::traits::{ToolError, ToolResult};
use autodl_claw_interfaces::Responder;
use autodl_claw_memory::{ConfigStore, UserId};
use autodl_claw_providers::{ApiConnector, ApiError, ComputeApi};
use autodl_claw_tasks::GrabTaskRegistry;
use parking_lot::RwLock;
use std::sync::Arc;

pub(crate) const CREDENTIALS_HINT: &str =
    "Set up your AutoDL account first with /user and /password.";

/// The user a function-calling round is executed for.
#[derive(Default)]
pub struct ActiveUser {
    current: RwLock<Option<UserId>>,
}

impl ActiveUser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, user_id: UserId) {
        *self.current.write() = Some(user_id);
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    pub fn get(&self) -> Option<UserId> {
        *self.current.read()
    }

    /// Sets the slot for the lifetime of the returned guard.
    pub fn scope(self: &Arc<Self>, user_id: UserId) -> ActiveUserScope {
        self.set(user_id);
        ActiveUserScope {
            slot: Arc::clone(self),
        }
    }
}

/// Clears the active user when dropped.
pub struct ActiveUserScope {
    slot: Arc<ActiveUser>,
}

impl Drop for ActiveUserScope {
    fn drop(&mut self) {
        self.slot.clear();
    }
}

pub struct ToolContext {
    pub store: Arc<dyn ConfigStore>,
    pub connector: Arc<dyn ApiConnector>,
    pub registry: GrabTaskRegistry,
    pub responder: Arc<dyn Responder>,
    pub active_user: Arc<ActiveUser>,
}

impl ToolContext {
    pub(crate) fn user(&self) -> Result<UserId, ToolError> {
        self.active_user
            .get()
            .ok_or_else(|| ToolError::Execution("no active user for this call".to_string()))
    }

    /// API session for `user_id`, or `None` when no credentials are stored.
    pub(crate) async fn client(&self, user_id: UserId) -> Option<Arc<dyn ComputeApi>> {
        let config = self.store.load(user_id).await;
        if !config.has_credentials() {
            return None;
        }
        Some(self.connector.connect(&config.username, &config.password))
    }
}

/// Turns an API error into the result reported back to the model.
pub(crate) fn api_failure(action: &str, error: &ApiError) -> ToolResult {
    if error.is_auth_failure() {
        ToolResult::failure("AutoDL login failed, check credentials")
    } else {
        ToolResult::failure(format!("{} failed: {}", action, error))
    }
}
