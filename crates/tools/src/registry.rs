use crate::context::ToolContext;
use crate::grab_tools::{GrabGpuTool, StopGrabTool};
use crate::instance_tools::{CheckGpuTool, StartInstanceTool, StopInstanceTool};
use crate::traits::Tool;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registry holding every AutoDL tool, bound to `ctx`.
    pub fn with_autodl_tools(ctx: Arc<ToolContext>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(CheckGpuTool::new(ctx.clone())));
        registry.register(Arc::new(StartInstanceTool::new(ctx.clone())));
        registry.register(Arc::new(StopInstanceTool::new(ctx.clone())));
        registry.register(Arc::new(GrabGpuTool::new(ctx.clone())));
        registry.register(Arc::new(StopGrabTool::new(ctx)));
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn schemas(&self) -> Vec<serde_json::Value> {
        self.tools
            .values()
            .map(|tool| {
                serde_json::json!({
                    "type": "function",
                    "function": {
                        "name": tool.name(),
                        "description": tool.description(),
                        "parameters": tool.schema()
                    }
                })
            })
            .collect()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
