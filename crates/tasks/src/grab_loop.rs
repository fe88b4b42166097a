//! Polling state machine executed by each grab task.

use crate::matcher::find_candidate;
use crate::metrics::{self, ApiTimer};
use autodl_claw_interfaces::Responder;
use autodl_claw_memory::{ConfigStore, GrabConfig, GrabTarget, UserId};
use autodl_claw_providers::{ApiConnector, ComputeApi};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a grab loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    Succeeded,
    Cancelled,
    MissingCredentials,
    NoTarget,
}

enum PollOutcome {
    PoweredOn,
    KeepPolling,
}

pub(crate) struct GrabLoop {
    pub user_id: UserId,
    pub grab: GrabConfig,
    pub store: Arc<dyn ConfigStore>,
    pub connector: Arc<dyn ApiConnector>,
    pub responder: Arc<dyn Responder>,
}

impl GrabLoop {
    pub async fn run(&self, cancel: &CancellationToken) -> LoopExit {
        let config = self.store.load(self.user_id).await;
        if !config.has_credentials() {
            self.responder
                .notify(self.user_id, "Grab failed: username or password not set")
                .await;
            return LoopExit::MissingCredentials;
        }
        if self.grab.target() == GrabTarget::Nothing {
            self.responder
                .notify(self.user_id, "Grab failed: no GPU type or instance UUID configured")
                .await;
            return LoopExit::NoTarget;
        }

        let api = self.connector.connect(&config.username, &config.password);
        let interval = Duration::from_secs(self.grab.effective_interval_secs());
        info!(
            "Grab loop started for user {} (interval {:?})",
            self.user_id, interval
        );

        loop {
            if cancel.is_cancelled() {
                return LoopExit::Cancelled;
            }

            if let PollOutcome::PoweredOn = self.poll_once(api.as_ref()).await {
                return LoopExit::Succeeded;
            }

            tokio::select! {
                _ = cancel.cancelled() => return LoopExit::Cancelled,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn poll_once(&self, api: &dyn ComputeApi) -> PollOutcome {
        metrics::record_poll();

        let listing = {
            let _timer = ApiTimer::start();
            api.list_instances().await
        };
        let instances = match listing {
            Ok(instances) => instances,
            Err(e) => {
                metrics::record_api_error();
                warn!("Grab poll for user {} failed: {}", self.user_id, e);
                return PollOutcome::KeepPolling;
            }
        };

        let target = self.grab.target();
        let Some(candidate) = find_candidate(&target, &instances) else {
            debug!("No idle match for user {} this round", self.user_id);
            return PollOutcome::KeepPolling;
        };

        metrics::record_power_on_attempt();
        let powered = {
            let _timer = ApiTimer::start();
            api.power_on(&candidate.uuid, false).await
        };

        match powered {
            Ok(true) => {
                metrics::record_success();
                info!("Grabbed instance {} for user {}", candidate.uuid, self.user_id);
                let message = match target {
                    GrabTarget::Instance(_) => {
                        format!("Grab succeeded: instance {} started", candidate.uuid)
                    }
                    _ => format!(
                        "Grab succeeded: instance {} ({}) started",
                        candidate.uuid, candidate.snapshot_gpu_alias_name
                    ),
                };
                self.responder.notify(self.user_id, &message).await;
                PollOutcome::PoweredOn
            }
            Ok(false) => {
                self.responder
                    .notify(
                        self.user_id,
                        &format!("Grab attempt failed: instance {} could not be started", candidate.uuid),
                    )
                    .await;
                PollOutcome::KeepPolling
            }
            Err(e) => {
                metrics::record_api_error();
                warn!(
                    "Power on {} for user {} failed: {}",
                    candidate.uuid, self.user_id, e
                );
                PollOutcome::KeepPolling
            }
        }
    }
}
