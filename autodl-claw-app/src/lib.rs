//! Wiring of the AutoDL bot: config store, platform connector, grab task
//! registry, command router and tools behind one handle.

pub mod config;

use anyhow::{Context, Result};
use autodl_claw_core::CommandRouter;
use autodl_claw_interfaces::Responder;
use autodl_claw_memory::{AsyncConfigStore, ConfigStore, SqliteConfigStore, UserId};
use autodl_claw_providers::{ApiConnector, AutoDlConnector};
use autodl_claw_tasks::GrabTaskRegistry;
use autodl_claw_tools::{ActiveUser, ToolContext, ToolError, ToolRegistry, ToolResult};
use config::AppConfig;
use std::sync::Arc;
use tracing::info;

/// Prefix that sends a line to the tool layer instead of the command router.
pub const TOOL_CALL_PREFIX: char = '!';

pub struct App {
    store: Arc<dyn ConfigStore>,
    registry: GrabTaskRegistry,
    router: CommandRouter,
    tools: ToolRegistry,
    active_user: Arc<ActiveUser>,
    /// Serializes function-calling rounds, which share the active-user slot.
    tool_round: tokio::sync::Mutex<()>,
    responder: Arc<dyn Responder>,
}

impl App {
    /// Opens the SQLite store and the HTTP connector described by `config`.
    pub fn open(config: &AppConfig, responder: Arc<dyn Responder>) -> Result<Self> {
        if let Some(parent) = config.db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let sqlite = SqliteConfigStore::new(&config.db_path)
            .with_context(|| format!("Failed to open {}", config.db_path.display()))?;
        let store: Arc<dyn ConfigStore> = Arc::new(AsyncConfigStore::new(Arc::new(sqlite)));
        let connector: Arc<dyn ApiConnector> = Arc::new(AutoDlConnector::new(
            config.api_base_url.clone(),
            config.http_timeout(),
        ));
        info!(
            "Opened user store at {} (API {})",
            config.db_path.display(),
            config.api_base_url
        );
        Ok(Self::with_parts(store, connector, responder))
    }

    pub fn with_parts(
        store: Arc<dyn ConfigStore>,
        connector: Arc<dyn ApiConnector>,
        responder: Arc<dyn Responder>,
    ) -> Self {
        let registry = GrabTaskRegistry::new(store.clone(), connector.clone());
        let router = CommandRouter::new(store.clone(), registry.clone(), connector.clone());
        let active_user = Arc::new(ActiveUser::new());
        let tools = ToolRegistry::with_autodl_tools(Arc::new(ToolContext {
            store: store.clone(),
            connector,
            registry: registry.clone(),
            responder: responder.clone(),
            active_user: active_user.clone(),
        }));

        Self {
            store,
            registry,
            router,
            tools,
            active_user,
            tool_round: tokio::sync::Mutex::new(()),
            responder,
        }
    }

    pub fn registry(&self) -> &GrabTaskRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn ConfigStore> {
        &self.store
    }

    /// Restarts grab tasks left running by the previous process.
    pub async fn resume(&self) -> usize {
        let resumed = self.registry.resume_all(self.responder.clone()).await;
        if resumed > 0 {
            info!("Resumed {} grab task(s)", resumed);
        }
        resumed
    }

    /// Handles one line from `user_id`, replying through the responder.
    pub async fn handle_line(&self, user_id: UserId, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        if let Some(call) = line.strip_prefix(TOOL_CALL_PREFIX) {
            let reply = match self.call_tool_line(user_id, call).await {
                Ok(result) => result.text().to_string(),
                Err(e) => e.to_string(),
            };
            self.responder.notify(user_id, &reply).await;
            return;
        }

        if !self
            .router
            .handle(user_id, line, self.responder.clone())
            .await
        {
            self.responder
                .notify(user_id, "Send /help for the list of commands")
                .await;
        }
    }

    async fn call_tool_line(&self, user_id: UserId, call: &str) -> Result<ToolResult, ToolError> {
        let (name, raw_args) = match call.trim().split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (call.trim(), ""),
        };
        let args = if raw_args.is_empty() {
            serde_json::json!({})
        } else {
            serde_json::from_str(raw_args)
                .map_err(|e| ToolError::Validation(format!("Invalid JSON arguments: {}", e)))?
        };
        self.call_tool(user_id, name, args).await
    }

    /// Runs one function-calling round with `user_id` as the active user.
    pub async fn call_tool(
        &self,
        user_id: UserId,
        name: &str,
        args: serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::Validation(format!("Unknown tool: {}", name)))?;

        let _round = self.tool_round.lock().await;
        let _scope = self.active_user.scope(user_id);
        tool.execute(args).await
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.list()
    }

    /// Cancels every grab task; their running flags stay set for the next start.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
