use crate::models::Instance;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Authentication failed: {0}")]
    AuthFailed(String),
    #[error("API error [{code}]: {msg}")]
    Api { code: String, msg: String },
}

impl ApiError {
    /// True when the platform rejected the credentials rather than the request.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ApiError::AuthFailed(_))
    }
}

/// Operations the bot needs from the compute-rental platform.
///
/// Implementations own the session token: every authenticated call is retried
/// exactly once after a fresh login when the platform reports the token as
/// expired.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn login(&self) -> Result<String, ApiError>;

    async fn list_instances(&self) -> Result<Vec<Instance>, ApiError>;

    /// Returns `Ok(false)` when the platform refused to start the instance.
    async fn power_on(&self, uuid: &str, cpu_only: bool) -> Result<bool, ApiError>;

    async fn power_off(&self, uuid: &str) -> Result<bool, ApiError>;

    /// Account balance in yuan.
    async fn balance(&self) -> Result<f64, ApiError>;
}

/// Builds an API session for a stored username/password pair.
pub trait ApiConnector: Send + Sync {
    fn connect(&self, username: &str, password: &str) -> Arc<dyn ComputeApi>;
}
