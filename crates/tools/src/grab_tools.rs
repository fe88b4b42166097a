use crate::context::{ToolContext, CREDENTIALS_HINT};
use crate::traits::{Tool, ToolError, ToolResult};
use async_trait::async_trait;
use autodl_claw_memory::{GrabConfig, DEFAULT_CHECK_INTERVAL_SECS, MIN_CHECK_INTERVAL_SECS};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

fn optional_str<'a>(args: &'a serde_json::Value, field: &str) -> Option<&'a str> {
    args[field]
        .as_str()
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// An instance UUID wins over a GPU model when both are given.
enum Target<'a> {
    Instance(&'a str),
    Gpu(&'a str),
}

pub struct GrabGpuTool {
    ctx: Arc<ToolContext>,
}

impl GrabGpuTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for GrabGpuTool {
    fn name(&self) -> &str {
        "grab_autodl_gpu"
    }

    fn description(&self) -> &str {
        "Start a background task that powers on the first idle GPU matching a model or instance"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "gpu_type": {
                    "type": "string",
                    "description": "GPU model to grab, e.g. A100"
                },
                "uuid": {
                    "type": "string",
                    "description": "UUID of a specific instance to grab"
                },
                "interval": {
                    "type": "integer",
                    "description": "Seconds between checks, at least 3",
                    "default": DEFAULT_CHECK_INTERVAL_SECS
                }
            }
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult, ToolError> {
        let gpu_type = optional_str(&args, "gpu_type");
        let uuid = optional_str(&args, "uuid");
        let interval = match args.get("interval") {
            None | Some(serde_json::Value::Null) => DEFAULT_CHECK_INTERVAL_SECS,
            Some(value) => {
                let requested = value.as_i64().ok_or_else(|| {
                    ToolError::Validation("'interval' must be an integer".to_string())
                })?;
                requested.max(MIN_CHECK_INTERVAL_SECS as i64) as u64
            }
        };
        let target = match (uuid, gpu_type) {
            (Some(uuid), _) => Target::Instance(uuid),
            (None, Some(gpu_type)) => Target::Gpu(gpu_type),
            (None, None) => {
                return Err(ToolError::Validation(
                    "Provide at least one of 'gpu_type' or 'uuid'".to_string(),
                ))
            }
        };
        let user_id = self.ctx.user()?;

        let stored = self.ctx.store.load(user_id).await;
        if !stored.has_credentials() {
            return Ok(ToolResult::failure(CREDENTIALS_HINT));
        }
        let existing = stored.grab_config.unwrap_or_default();
        let (grab, target) = match target {
            Target::Instance(uuid) => {
                (existing.targeting_instance(uuid), format!("instance {}", uuid))
            }
            Target::Gpu(gpu_type) => {
                (existing.targeting_gpu(gpu_type), format!("GPU type {}", gpu_type))
            }
        };
        let grab = GrabConfig {
            check_interval_secs: interval,
            ..grab
        };

        info!("grab_autodl_gpu for user {}: {}", user_id, target);
        self.ctx
            .registry
            .start(user_id, grab, self.ctx.responder.clone())
            .await;

        Ok(ToolResult::message(format!(
            "Grab started: {}, checking every {} seconds",
            target, interval
        )))
    }
}

pub struct StopGrabTool {
    ctx: Arc<ToolContext>,
}

impl StopGrabTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for StopGrabTool {
    fn name(&self) -> &str {
        "stop_autodl_grab"
    }

    fn description(&self) -> &str {
        "Stop the user's running grab task"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<ToolResult, ToolError> {
        let user_id = self.ctx.user()?;
        if self.ctx.registry.stop(user_id).await {
            Ok(ToolResult::message("Grab task stopped"))
        } else {
            Ok(ToolResult::failure("No grab task is running"))
        }
    }
}
