use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Execution error: {0}")]
    Execution(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub error: Option<String>,
}

impl ToolResult {
    /// Successful call whose answer is a single user-facing message.
    pub fn message(text: impl Into<String>) -> Self {
        Self {
            success: true,
            output: json!({ "message": text.into() }),
            error: None,
        }
    }

    /// Call that reached the platform (or the store) and was refused there.
    pub fn failure(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            success: false,
            output: json!({ "message": text.clone() }),
            error: Some(text),
        }
    }

    pub fn text(&self) -> &str {
        self.output["message"].as_str().unwrap_or_default()
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn schema(&self) -> serde_json::Value;

    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult, ToolError>;
}
