//! Maps parsed commands to store, platform and grab-task actions.
//!
//! Every handler answers through the [`Responder`]; failures are turned into
//! text and never returned to the front-end.

use crate::command::Command;
use autodl_claw_interfaces::Responder;
use autodl_claw_memory::{ConfigStore, GrabConfig, GrabTarget, UserId};
use autodl_claw_providers::{ApiConnector, ApiError, ComputeApi, Instance};
use autodl_claw_tasks::GrabTaskRegistry;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Time a CPU-only start is given before the instance is powered off again.
pub const REFRESH_SETTLE: Duration = Duration::from_secs(5);
/// Pause between instances during `/refreshall`.
pub const REFRESH_SPACING: Duration = Duration::from_secs(3);

const SEPARATOR: &str = "----------------";

pub const HELP_TEXT: &str = "AutoDL monitor and GPU grabber

Commands:
/user <username> - set username (phone number)
/password <password> - set password
/gpuvalid - show idle GPUs per instance
/instances - list instances
/start <uuid> - power on an instance
/startcpu <uuid> - power on an instance without GPU
/stop <uuid> - power off an instance
/refresh <uuid> - reset an instance's release timer (CPU-only start, then stop)
/refreshall - reset the release timer of every instance
/getuser - show the stored username
/balance - show account balance
/grabmenu - show the grab menu
/grabgpu <gpu_type> - grab an idle GPU of this type
/grabuuid <uuid> - grab a specific instance
/stopgrab - stop the grab task
/grabstatus - show grab task status";

pub const GRAB_MENU_TEXT: &str = "Grab commands:

1. Grab by GPU type:
   /grabgpu <gpu_type>
   e.g. /grabgpu A100

2. Grab a specific instance:
   /grabuuid <uuid>
   e.g. /grabuuid i-abcdef123456

3. Stop grabbing:
   /stopgrab

4. Show grab status:
   /grabstatus";

const CREDENTIALS_MISSING: &str = "Set your username and password first with /user and /password";

pub struct CommandRouter {
    store: Arc<dyn ConfigStore>,
    registry: GrabTaskRegistry,
    connector: Arc<dyn ApiConnector>,
}

impl CommandRouter {
    pub fn new(
        store: Arc<dyn ConfigStore>,
        registry: GrabTaskRegistry,
        connector: Arc<dyn ApiConnector>,
    ) -> Self {
        Self {
            store,
            registry,
            connector,
        }
    }

    /// Handles one inbound line. Returns `false` if the line is not a command.
    pub async fn handle(&self, user_id: UserId, line: &str, responder: Arc<dyn Responder>) -> bool {
        if !Command::is_command(line) {
            return false;
        }

        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                responder.notify(user_id, &e.to_string()).await;
                return true;
            }
        };
        info!("User {} issued {:?}", user_id, command);
        self.dispatch(user_id, command, responder).await;
        true
    }

    async fn dispatch(&self, user_id: UserId, command: Command, responder: Arc<dyn Responder>) {
        let reply = Reply {
            user_id,
            responder: responder.as_ref(),
        };
        match command {
            Command::Help => reply.send(HELP_TEXT).await,
            Command::GrabMenu => reply.send(GRAB_MENU_TEXT).await,
            Command::SetUser(username) => self.set_user(reply, username).await,
            Command::SetPassword(password) => self.set_password(reply, password).await,
            Command::GetUser => self.get_user(reply).await,
            Command::GpuValid => self.gpu_valid(reply).await,
            Command::Instances => self.instances(reply).await,
            Command::Start(uuid) => self.power_on(reply, &uuid, false).await,
            Command::StartCpu(uuid) => self.power_on(reply, &uuid, true).await,
            Command::Stop(uuid) => self.power_off(reply, &uuid).await,
            Command::Refresh(uuid) => self.refresh(reply, &uuid).await,
            Command::RefreshAll => self.refresh_all(reply).await,
            Command::Balance => self.balance(reply).await,
            Command::GrabGpu(gpu_type) => {
                self.start_grab(user_id, responder.clone(), GrabRequest::GpuType(gpu_type))
                    .await
            }
            Command::GrabUuid(uuid) => {
                self.start_grab(user_id, responder.clone(), GrabRequest::Instance(uuid))
                    .await
            }
            Command::StopGrab => self.stop_grab(reply).await,
            Command::GrabStatus => self.grab_status(reply).await,
        }
    }

    async fn set_user(&self, reply: Reply<'_>, username: String) {
        let message = format!("Username set to: {}", username);
        let saved = self
            .store
            .update(reply.user_id, Box::new(move |config| config.username = username))
            .await;
        match saved {
            Some(_) => reply.send(&message).await,
            None => reply.send("Failed to save username, try again").await,
        }
    }

    async fn set_password(&self, reply: Reply<'_>, password: String) {
        let saved = self
            .store
            .update(reply.user_id, Box::new(move |config| config.password = password))
            .await;
        match saved {
            Some(_) => reply.send("Password set").await,
            None => reply.send("Failed to save password, try again").await,
        }
    }

    async fn get_user(&self, reply: Reply<'_>) {
        let config = self.store.load(reply.user_id).await;
        if config.username.is_empty() {
            reply.send("No username set").await;
        } else {
            reply
                .send(&format!("Current username: {}", config.username))
                .await;
        }
    }

    /// API session for the user, or `None` after telling them to log in.
    async fn client(&self, reply: &Reply<'_>) -> Option<Arc<dyn ComputeApi>> {
        let config = self.store.load(reply.user_id).await;
        if !config.has_credentials() {
            reply.send(CREDENTIALS_MISSING).await;
            return None;
        }
        Some(self.connector.connect(&config.username, &config.password))
    }

    /// Fetches the instance list, reporting empty results and errors.
    async fn fetch_instances(&self, reply: &Reply<'_>, api: &dyn ComputeApi) -> Option<Vec<Instance>> {
        match api.list_instances().await {
            Ok(instances) if instances.is_empty() => {
                reply.send("No instances found").await;
                None
            }
            Ok(instances) => Some(instances),
            Err(e) => {
                reply.failure("Fetching instances", &e).await;
                None
            }
        }
    }

    async fn gpu_valid(&self, reply: Reply<'_>) {
        let Some(api) = self.client(&reply).await else {
            return;
        };
        reply.send("Querying GPU status...").await;
        let Some(instances) = self.fetch_instances(&reply, api.as_ref()).await else {
            return;
        };

        let now = Utc::now();
        let blocks: Vec<String> = instances
            .iter()
            .map(|instance| {
                let mut block = format!(
                    "Machine: {}\nGPU: {}\nUUID: {}\nGPUs: {}/{}",
                    instance.display_name(),
                    instance.snapshot_gpu_alias_name,
                    instance.uuid,
                    instance.gpu_idle_num,
                    instance.gpu_all_num
                );
                if let Some(remaining) = instance.lease_remaining(now) {
                    block.push_str(&format!(
                        "\nReleased in: {}h {}m",
                        remaining.num_hours(),
                        remaining.num_minutes() % 60
                    ));
                }
                block
            })
            .collect();

        reply
            .send(&format!("GPU status:\n\n{}", join_blocks(&blocks)))
            .await;
    }

    async fn instances(&self, reply: Reply<'_>) {
        let Some(api) = self.client(&reply).await else {
            return;
        };
        reply.send("Querying instances...").await;
        let Some(instances) = self.fetch_instances(&reply, api.as_ref()).await else {
            return;
        };

        let blocks: Vec<String> = instances
            .iter()
            .enumerate()
            .map(|(i, instance)| {
                format!(
                    "{}. {}\nGPU: {}\nUUID: {}\nGPUs: {}/{}",
                    i + 1,
                    instance.display_name(),
                    instance.snapshot_gpu_alias_name,
                    instance.uuid,
                    instance.gpu_idle_num,
                    instance.gpu_all_num
                )
            })
            .collect();

        reply
            .send(&format!("Instances:\n\n{}", join_blocks(&blocks)))
            .await;
    }

    async fn power_on(&self, reply: Reply<'_>, uuid: &str, cpu_only: bool) {
        let Some(api) = self.client(&reply).await else {
            return;
        };
        let mode = if cpu_only { " (CPU-only)" } else { "" };
        reply
            .send(&format!("Starting instance {}{}...", uuid, mode))
            .await;

        match api.power_on(uuid, cpu_only).await {
            Ok(true) => reply.send(&format!("Instance started{}", mode)).await,
            Ok(false) => reply.send(&format!("Instance failed to start{}", mode)).await,
            Err(e) => reply.failure("Starting the instance", &e).await,
        }
    }

    async fn power_off(&self, reply: Reply<'_>, uuid: &str) {
        let Some(api) = self.client(&reply).await else {
            return;
        };
        reply.send(&format!("Stopping instance {}...", uuid)).await;

        match api.power_off(uuid).await {
            Ok(true) => reply.send("Instance stopped").await,
            Ok(false) => reply.send("Instance failed to stop").await,
            Err(e) => reply.failure("Stopping the instance", &e).await,
        }
    }

    async fn refresh(&self, reply: Reply<'_>, uuid: &str) {
        let Some(api) = self.client(&reply).await else {
            return;
        };
        reply
            .send(&format!("Refreshing release timer of instance {}...", uuid))
            .await;

        match power_cycle(api.as_ref(), uuid).await {
            Ok(()) => reply.send("Instance release timer refreshed").await,
            Err(CycleError::StartRefused) => {
                reply
                    .send("Failed to start the instance, release timer not refreshed")
                    .await
            }
            Err(CycleError::StopRefused) => {
                reply
                    .send("Failed to stop the instance, please stop it manually")
                    .await
            }
            Err(CycleError::Api(e)) => reply.failure("Refreshing the instance", &e).await,
        }
    }

    async fn refresh_all(&self, reply: Reply<'_>) {
        let Some(api) = self.client(&reply).await else {
            return;
        };
        reply.send("Fetching instances...").await;
        let Some(instances) = self.fetch_instances(&reply, api.as_ref()).await else {
            return;
        };
        reply
            .send(&format!(
                "Refreshing release timer of {} instance(s)...",
                instances.len()
            ))
            .await;

        for (i, instance) in instances.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(REFRESH_SPACING).await;
            }
            reply
                .send(&format!(
                    "Refreshing {} ({})...",
                    instance.machine_alias, instance.uuid
                ))
                .await;

            match power_cycle(api.as_ref(), &instance.uuid).await {
                Ok(()) => {
                    reply
                        .send(&format!("{} refreshed", instance.machine_alias))
                        .await
                }
                Err(CycleError::StartRefused) => {
                    reply
                        .send(&format!("Failed to start {}, skipped", instance.uuid))
                        .await
                }
                Err(CycleError::StopRefused) => {
                    reply
                        .send(&format!(
                            "Failed to stop {}, please stop it manually",
                            instance.uuid
                        ))
                        .await
                }
                Err(CycleError::Api(e)) => {
                    warn!("Refresh of {} failed: {}", instance.uuid, e);
                    reply
                        .send(&format!("Refreshing {} failed: {}", instance.uuid, e))
                        .await
                }
            }
        }

        reply.send("All instances refreshed").await;
    }

    async fn balance(&self, reply: Reply<'_>) {
        let Some(api) = self.client(&reply).await else {
            return;
        };
        match api.balance().await {
            Ok(balance) => {
                reply
                    .send(&format!("Account balance: {:.2} CNY", balance))
                    .await
            }
            Err(e) => reply.failure("Fetching the balance", &e).await,
        }
    }

    async fn start_grab(&self, user_id: UserId, responder: Arc<dyn Responder>, request: GrabRequest) {
        let reply = Reply {
            user_id,
            responder: responder.as_ref(),
        };
        let config = self.store.load(user_id).await;
        if !config.has_credentials() {
            reply.send(CREDENTIALS_MISSING).await;
            return;
        }

        let existing = config.grab_config.unwrap_or_default();
        let (grab, message) = match &request {
            GrabRequest::GpuType(gpu_type) => (
                existing.targeting_gpu(gpu_type),
                format!("Grab task started for {}", gpu_type),
            ),
            GrabRequest::Instance(uuid) => (
                existing.targeting_instance(uuid),
                format!("Grab task started for instance {}", uuid),
            ),
        };

        self.registry.start(user_id, grab, responder.clone()).await;
        reply.send(&message).await;
    }

    async fn stop_grab(&self, reply: Reply<'_>) {
        if self.registry.stop(reply.user_id).await {
            reply.send("Grab task stopped").await;
        } else {
            reply.send("No active grab task").await;
        }
    }

    async fn grab_status(&self, reply: Reply<'_>) {
        let grab = match self.registry.status(reply.user_id).await {
            Some(grab) if grab.enabled => grab,
            _ => {
                reply.send("Grab task not started").await;
                return;
            }
        };
        reply.send(&describe_grab(&grab)).await;
    }
}

enum GrabRequest {
    GpuType(String),
    Instance(String),
}

/// Addressed reply channel for one command.
#[derive(Clone, Copy)]
struct Reply<'a> {
    user_id: UserId,
    responder: &'a dyn Responder,
}

impl Reply<'_> {
    async fn send(&self, text: &str) {
        self.responder.notify(self.user_id, text).await;
    }

    async fn failure(&self, action: &str, error: &ApiError) {
        warn!("{} for user {} failed: {}", action, self.user_id, error);
        if error.is_auth_failure() {
            self.send("Login failed, check credentials").await;
        } else {
            self.send(&format!("{} failed: {}", action, error)).await;
        }
    }
}

enum CycleError {
    StartRefused,
    StopRefused,
    Api(ApiError),
}

impl From<ApiError> for CycleError {
    fn from(e: ApiError) -> Self {
        CycleError::Api(e)
    }
}

/// CPU-only start followed by a stop, which resets the release timer.
async fn power_cycle(api: &dyn ComputeApi, uuid: &str) -> Result<(), CycleError> {
    if !api.power_on(uuid, true).await? {
        return Err(CycleError::StartRefused);
    }
    tokio::time::sleep(REFRESH_SETTLE).await;
    if !api.power_off(uuid).await? {
        return Err(CycleError::StopRefused);
    }
    Ok(())
}

fn join_blocks(blocks: &[String]) -> String {
    blocks.join(&format!("\n{}\n", SEPARATOR))
}

pub fn describe_grab(grab: &GrabConfig) -> String {
    let state = if grab.is_running { "running" } else { "stopped" };
    let mut text = format!("Grab task status: {}\n", state);
    match grab.target() {
        GrabTarget::Instance(uuid) => text.push_str(&format!("Target instance UUID: {}\n", uuid)),
        GrabTarget::GpuTypes(types) => {
            text.push_str(&format!("Target GPU types: {}\n", types.join(", ")))
        }
        GrabTarget::Nothing => {}
    }
    text.push_str(&format!("Check interval: {}s", grab.check_interval_secs));
    text
}
