#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use async_trait::async_trait;
use autodl_claw_core::CommandRouter;
use autodl_claw_interfaces::{ChannelResponder, Notification, Responder};
use autodl_claw_memory::{
    ConfigMutation, ConfigStore, GrabConfig, InMemoryConfigStore, UserConfig, UserId,
};
use autodl_claw_providers::{ApiConnector, ApiError, ComputeApi, Instance, StoppedAt};
use autodl_claw_tasks::GrabTaskRegistry;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    PowerOn(String, bool),
    PowerOff(String),
}

#[derive(Default)]
struct MockApi {
    instances: Vec<Instance>,
    reject_login: bool,
    refuse_power_on: Vec<String>,
    calls: Mutex<Vec<(Call, Instant)>>,
    api_calls: AtomicUsize,
}

impl MockApi {
    fn enter(&self) -> Result<(), ApiError> {
        self.api_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject_login {
            return Err(ApiError::AuthFailed("wrong password".to_string()));
        }
        Ok(())
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push((call, Instant::now()));
    }

    fn calls(&self) -> Vec<(Call, Instant)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeApi for MockApi {
    async fn login(&self) -> Result<String, ApiError> {
        self.enter()?;
        Ok("token".to_string())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, ApiError> {
        self.enter()?;
        Ok(self.instances.clone())
    }

    async fn power_on(&self, uuid: &str, cpu_only: bool) -> Result<bool, ApiError> {
        self.enter()?;
        self.record(Call::PowerOn(uuid.to_string(), cpu_only));
        Ok(!self.refuse_power_on.iter().any(|refused| refused == uuid))
    }

    async fn power_off(&self, uuid: &str) -> Result<bool, ApiError> {
        self.enter()?;
        self.record(Call::PowerOff(uuid.to_string()));
        Ok(true)
    }

    async fn balance(&self) -> Result<f64, ApiError> {
        self.enter()?;
        Ok(123.456)
    }
}

struct MockConnector(Arc<MockApi>);

impl ApiConnector for MockConnector {
    fn connect(&self, _username: &str, _password: &str) -> Arc<dyn ComputeApi> {
        self.0.clone()
    }
}

const USER: UserId = 11;

struct Fixture {
    router: CommandRouter,
    registry: GrabTaskRegistry,
    store: Arc<InMemoryConfigStore>,
    api: Arc<MockApi>,
    responder: Arc<dyn Responder>,
    rx: UnboundedReceiver<Notification>,
}

impl Fixture {
    fn new(api: MockApi, config: Option<UserConfig>) -> Self {
        let configs: HashMap<UserId, UserConfig> = config.into_iter().map(|c| (USER, c)).collect();
        let store = Arc::new(InMemoryConfigStore::with_configs(configs));
        let api = Arc::new(api);
        let connector: Arc<dyn ApiConnector> = Arc::new(MockConnector(api.clone()));
        let registry = GrabTaskRegistry::new(store.clone() as Arc<dyn ConfigStore>, connector.clone());
        let router = CommandRouter::new(store.clone(), registry.clone(), connector);
        let (responder, rx) = ChannelResponder::new();
        Self {
            router,
            registry,
            store,
            api,
            responder: Arc::new(responder),
            rx,
        }
    }

    fn logged_in(api: MockApi) -> Self {
        Self::new(api, Some(credentials()))
    }

    async fn send(&mut self, line: &str) -> Vec<String> {
        assert!(self.router.handle(USER, line, self.responder.clone()).await);
        let mut replies = Vec::new();
        while let Ok(notification) = self.rx.try_recv() {
            assert_eq!(notification.user_id, USER);
            replies.push(notification.text);
        }
        replies
    }
}

fn credentials() -> UserConfig {
    UserConfig {
        username: "5551234".to_string(),
        password: "secret".to_string(),
        grab_config: None,
    }
}

fn instance(uuid: &str, alias: &str, idle: u32) -> Instance {
    Instance {
        uuid: uuid.to_string(),
        machine_alias: format!("box-{}", uuid),
        region_name: "west".to_string(),
        gpu_all_num: 8,
        gpu_idle_num: idle,
        snapshot_gpu_alias_name: alias.to_string(),
        stopped_at: None,
    }
}

#[tokio::test]
async fn test_plain_text_is_not_handled() {
    let fx = Fixture::logged_in(MockApi::default());
    assert!(!fx.router.handle(USER, "hello", fx.responder.clone()).await);
}

#[tokio::test]
async fn test_unknown_and_incomplete_commands_answer_with_usage() {
    let mut fx = Fixture::logged_in(MockApi::default());

    assert_eq!(
        fx.send("/reboot").await,
        vec!["Unknown command: /reboot. Send /help for the list of commands."]
    );
    assert_eq!(
        fx.send("/grabgpu").await,
        vec!["Missing argument. Usage: /grabgpu <gpu_type>"]
    );
    assert!(fx.send("/help").await[0].contains("/grabstatus"));
}

#[tokio::test]
async fn test_credentials_are_stored_as_given() {
    let mut fx = Fixture::new(MockApi::default(), None);

    assert_eq!(fx.send("/getuser").await, vec!["No username set"]);
    assert_eq!(fx.send("/user 5550000").await, vec!["Username set to: 5550000"]);
    assert_eq!(fx.send("/password hunter2").await, vec!["Password set"]);
    assert_eq!(fx.send("/getuser").await, vec!["Current username: 5550000"]);

    let stored = fx.store.load(USER).await;
    assert_eq!(stored.password, "hunter2");
}

/// Store whose writes never land, like a read-only database file.
struct ReadOnlyStore;

#[async_trait]
impl ConfigStore for ReadOnlyStore {
    async fn load(&self, _user_id: UserId) -> UserConfig {
        UserConfig::default()
    }

    async fn save(&self, _user_id: UserId, _config: &UserConfig) -> bool {
        false
    }

    async fn load_all(&self) -> HashMap<UserId, UserConfig> {
        HashMap::new()
    }

    async fn update(&self, _user_id: UserId, _mutation: ConfigMutation) -> Option<UserConfig> {
        None
    }
}

#[tokio::test]
async fn test_unsaved_credentials_are_reported() {
    let store: Arc<dyn ConfigStore> = Arc::new(ReadOnlyStore);
    let connector: Arc<dyn ApiConnector> = Arc::new(MockConnector(Arc::new(MockApi::default())));
    let registry = GrabTaskRegistry::new(store.clone(), connector.clone());
    let router = CommandRouter::new(store, registry, connector);
    let (responder, mut rx) = ChannelResponder::new();
    let responder: Arc<dyn Responder> = Arc::new(responder);

    assert!(router.handle(USER, "/user 5550000", responder.clone()).await);
    assert!(router.handle(USER, "/password hunter2", responder).await);

    assert_eq!(
        rx.recv().await.unwrap().text,
        "Failed to save username, try again"
    );
    assert_eq!(
        rx.recv().await.unwrap().text,
        "Failed to save password, try again"
    );
}

#[tokio::test]
async fn test_missing_credentials_short_circuit() {
    let mut fx = Fixture::new(MockApi::default(), None);

    for line in ["/instances", "/start inst-1", "/balance", "/grabgpu A100"] {
        assert_eq!(
            fx.send(line).await,
            vec!["Set your username and password first with /user and /password"]
        );
    }
    assert_eq!(fx.api.api_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.registry.active_count(), 0);
}

#[tokio::test]
async fn test_auth_failure_asks_to_check_credentials() {
    let api = MockApi {
        reject_login: true,
        ..Default::default()
    };
    let mut fx = Fixture::logged_in(api);

    let replies = fx.send("/balance").await;

    assert_eq!(replies, vec!["Login failed, check credentials"]);
}

#[tokio::test]
async fn test_gpuvalid_shows_release_countdown() {
    let mut stopped = instance("inst-1", "RTX 4090", 0);
    stopped.stopped_at = Some(StoppedAt {
        time: Some((Utc::now() - chrono::Duration::hours(1)).to_rfc3339()),
    });
    let api = MockApi {
        instances: vec![stopped, instance("inst-2", "A100", 3)],
        ..Default::default()
    };
    let mut fx = Fixture::logged_in(api);

    let replies = fx.send("/gpuvalid").await;

    assert_eq!(replies[0], "Querying GPU status...");
    let listing = &replies[1];
    assert!(listing.starts_with("GPU status:\n\nMachine: west-box-inst-1"));
    assert!(listing.contains("Released in: 22h 59m"));
    assert!(listing.contains("UUID: inst-2\nGPUs: 3/8"));
    assert_eq!(listing.matches("Released in").count(), 1);
}

#[tokio::test]
async fn test_instances_are_numbered() {
    let api = MockApi {
        instances: vec![instance("inst-1", "A100", 1), instance("inst-2", "A100", 0)],
        ..Default::default()
    };
    let mut fx = Fixture::logged_in(api);

    let replies = fx.send("/instances").await;

    assert!(replies[1].contains("1. west-box-inst-1"));
    assert!(replies[1].contains("----------------\n2. west-box-inst-2"));
}

#[tokio::test]
async fn test_start_and_stop_report_outcome() {
    let api = MockApi {
        refuse_power_on: vec!["inst-9".to_string()],
        ..Default::default()
    };
    let mut fx = Fixture::logged_in(api);

    assert_eq!(
        fx.send("/startcpu inst-1").await,
        vec![
            "Starting instance inst-1 (CPU-only)...",
            "Instance started (CPU-only)"
        ]
    );
    assert_eq!(
        fx.send("/start inst-9").await,
        vec!["Starting instance inst-9...", "Instance failed to start"]
    );
    assert_eq!(
        fx.send("/stop inst-1").await,
        vec!["Stopping instance inst-1...", "Instance stopped"]
    );
    assert_eq!(fx.send("/balance").await, vec!["Account balance: 123.46 CNY"]);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_power_cycles_in_cpu_mode() {
    let mut fx = Fixture::logged_in(MockApi::default());

    let replies = fx.send("/refresh inst-1").await;

    assert_eq!(replies.last().unwrap(), "Instance release timer refreshed");
    let calls = fx.api.calls();
    assert_eq!(calls[0].0, Call::PowerOn("inst-1".to_string(), true));
    assert_eq!(calls[1].0, Call::PowerOff("inst-1".to_string()));
    assert_eq!(calls[1].1 - calls[0].1, Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_refresh_all_spaces_instances() {
    let api = MockApi {
        instances: vec![instance("a", "A100", 0), instance("b", "A100", 0)],
        ..Default::default()
    };
    let mut fx = Fixture::logged_in(api);

    let replies = fx.send("/refreshall").await;

    assert_eq!(replies.last().unwrap(), "All instances refreshed");
    let calls = fx.api.calls();
    let order: Vec<Call> = calls.iter().map(|(call, _)| call.clone()).collect();
    assert_eq!(
        order,
        vec![
            Call::PowerOn("a".to_string(), true),
            Call::PowerOff("a".to_string()),
            Call::PowerOn("b".to_string(), true),
            Call::PowerOff("b".to_string()),
        ]
    );
    assert_eq!(calls[2].1 - calls[1].1, Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn test_second_grab_supersedes_first() {
    let mut fx = Fixture::logged_in(MockApi::default());

    assert_eq!(
        fx.send("/grabgpu A100").await,
        vec!["Grab task started for A100"]
    );
    fx.send("/grabgpu A6000").await;

    assert_eq!(fx.registry.active_count(), 1);
    let grab = fx.registry.status(USER).await.unwrap();
    assert_eq!(grab.gpu_types, vec!["A6000".to_string()]);
    assert_eq!(grab.check_interval_secs, 5);

    assert_eq!(
        fx.send("/grabstatus").await,
        vec!["Grab task status: running\nTarget GPU types: A6000\nCheck interval: 5s"]
    );
    fx.registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_grab_keeps_stored_interval() {
    let config = UserConfig {
        grab_config: Some(GrabConfig {
            check_interval_secs: 10,
            ..GrabConfig::default().targeting_instance("old")
        }),
        ..credentials()
    };
    let mut fx = Fixture::new(MockApi::default(), Some(config));

    fx.send("/grabuuid inst-7").await;

    let grab = fx.registry.status(USER).await.unwrap();
    assert_eq!(grab.instance_uuid, "inst-7");
    assert!(grab.gpu_types.is_empty());
    assert_eq!(grab.check_interval_secs, 10);
    fx.registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stopgrab() {
    let mut fx = Fixture::logged_in(MockApi::default());
    let writes = fx.store.writes();

    assert_eq!(fx.send("/stopgrab").await, vec!["No active grab task"]);
    assert_eq!(fx.store.writes(), writes);
    assert_eq!(fx.registry.active_count(), 0);

    fx.send("/grabuuid inst-1").await;
    assert_eq!(fx.send("/stopgrab").await, vec!["Grab task stopped"]);
    assert_eq!(fx.registry.active_count(), 0);
    assert!(fx.send("/grabstatus").await[0].starts_with("Grab task status: stopped"));
}

#[tokio::test]
async fn test_grabstatus_without_grab() {
    let mut fx = Fixture::logged_in(MockApi::default());
    assert_eq!(fx.send("/grabstatus").await, vec!["Grab task not started"]);
}
