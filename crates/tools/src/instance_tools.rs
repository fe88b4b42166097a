use crate::context::{api_failure, ToolContext, CREDENTIALS_HINT};
use crate::traits::{Tool, ToolError, ToolResult};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

pub(crate) fn required_str<'a>(args: &'a serde_json::Value, field: &str) -> Result<&'a str, ToolError> {
    args[field]
        .as_str()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ToolError::Validation(format!("Missing '{}' field", field)))
}

pub struct CheckGpuTool {
    ctx: Arc<ToolContext>,
}

impl CheckGpuTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for CheckGpuTool {
    fn name(&self) -> &str {
        "check_autodl_gpu"
    }

    fn description(&self) -> &str {
        "Check GPU availability across the user's AutoDL instances"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _args: serde_json::Value) -> Result<ToolResult, ToolError> {
        let user_id = self.ctx.user()?;
        let Some(api) = self.ctx.client(user_id).await else {
            return Ok(ToolResult::failure(CREDENTIALS_HINT));
        };

        let instances = match api.list_instances().await {
            Ok(instances) => instances,
            Err(e) => {
                warn!("check_autodl_gpu for user {} failed: {}", user_id, e);
                return Ok(api_failure("Querying GPU status", &e));
            }
        };
        if instances.is_empty() {
            return Ok(ToolResult::message("No instances found on this AutoDL account."));
        }

        let blocks: Vec<String> = instances
            .iter()
            .map(|instance| {
                format!(
                    "{}\nGPU: {}\nUUID: {}\nIdle GPUs: {}/{}",
                    instance.display_name(),
                    instance.snapshot_gpu_alias_name,
                    instance.uuid,
                    instance.gpu_idle_num,
                    instance.gpu_all_num
                )
            })
            .collect();
        let idle = instances.iter().filter(|i| i.has_idle_gpu()).count();
        let summary = if idle > 0 {
            format!("Summary: {} instance(s) have an idle GPU", idle)
        } else {
            "Summary: no idle GPU available right now".to_string()
        };
        let text = format!(
            "Your AutoDL instances:\n\n{}\n\n{}",
            blocks.join("\n----------------\n"),
            summary
        );

        Ok(ToolResult {
            success: true,
            output: json!({
                "message": text,
                "idle_instances": idle,
                "instances": instances,
            }),
            error: None,
        })
    }
}

pub struct StartInstanceTool {
    ctx: Arc<ToolContext>,
}

impl StartInstanceTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for StartInstanceTool {
    fn name(&self) -> &str {
        "start_autodl_instance"
    }

    fn description(&self) -> &str {
        "Power on one of the user's AutoDL instances"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "uuid": {
                    "type": "string",
                    "description": "UUID of the instance to start"
                },
                "use_cpu": {
                    "type": "boolean",
                    "description": "Start without a GPU (CPU-only mode)",
                    "default": false
                }
            },
            "required": ["uuid"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult, ToolError> {
        let uuid = required_str(&args, "uuid")?;
        let use_cpu = args["use_cpu"].as_bool().unwrap_or(false);
        let user_id = self.ctx.user()?;
        let Some(api) = self.ctx.client(user_id).await else {
            return Ok(ToolResult::failure(CREDENTIALS_HINT));
        };

        let mode = if use_cpu { "CPU-only mode" } else { "normal mode" };
        match api.power_on(uuid, use_cpu).await {
            Ok(true) => Ok(ToolResult::message(format!(
                "Instance {} started ({})",
                uuid, mode
            ))),
            Ok(false) => Ok(ToolResult::failure(format!(
                "Instance {} could not be started, check the UUID and instance state",
                uuid
            ))),
            Err(e) => {
                warn!("start_autodl_instance {} for user {} failed: {}", uuid, user_id, e);
                Ok(api_failure("Starting the instance", &e))
            }
        }
    }
}

pub struct StopInstanceTool {
    ctx: Arc<ToolContext>,
}

impl StopInstanceTool {
    pub fn new(ctx: Arc<ToolContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl Tool for StopInstanceTool {
    fn name(&self) -> &str {
        "stop_autodl_instance"
    }

    fn description(&self) -> &str {
        "Power off one of the user's AutoDL instances"
    }

    fn schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "uuid": {
                    "type": "string",
                    "description": "UUID of the instance to stop"
                }
            },
            "required": ["uuid"]
        })
    }

    async fn execute(&self, args: serde_json::Value) -> Result<ToolResult, ToolError> {
        let uuid = required_str(&args, "uuid")?;
        let user_id = self.ctx.user()?;
        let Some(api) = self.ctx.client(user_id).await else {
            return Ok(ToolResult::failure(CREDENTIALS_HINT));
        };

        match api.power_off(uuid).await {
            Ok(true) => Ok(ToolResult::message(format!("Instance {} stopped", uuid))),
            Ok(false) => Ok(ToolResult::failure(format!(
                "Instance {} could not be stopped, check the UUID and instance state",
                uuid
            ))),
            Err(e) => {
                warn!("stop_autodl_instance {} for user {} failed: {}", uuid, user_id, e);
                Ok(api_failure("Stopping the instance", &e))
            }
        }
    }
}
