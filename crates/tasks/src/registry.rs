//! Per-user registry of running grab tasks.

use crate::grab_loop::{GrabLoop, LoopExit};
use autodl_claw_interfaces::Responder;
use autodl_claw_memory::{ConfigStore, GrabConfig, UserId};
use autodl_claw_providers::ApiConnector;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Upper bound `stop` waits for a cancelled worker to exit.
pub const STOP_GRACE: Duration = Duration::from_secs(1);

struct GrabTaskHandle {
    generation: u64,
    cancel: CancellationToken,
    worker: Option<JoinHandle<()>>,
}

struct RegistryInner {
    tasks: Mutex<HashMap<UserId, GrabTaskHandle>>,
    user_locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
    next_generation: AtomicU64,
    store: Arc<dyn ConfigStore>,
    connector: Arc<dyn ApiConnector>,
    stop_grace: Duration,
}

/// Owns every live grab task; at most one per user.
///
/// `start`/`stop` for the same user are serialized by a per-user async lock.
/// The task map itself is only locked for short synchronous sections.
#[derive(Clone)]
pub struct GrabTaskRegistry {
    inner: Arc<RegistryInner>,
}

impl GrabTaskRegistry {
    pub fn new(store: Arc<dyn ConfigStore>, connector: Arc<dyn ApiConnector>) -> Self {
        Self::with_stop_grace(store, connector, STOP_GRACE)
    }

    pub fn with_stop_grace(
        store: Arc<dyn ConfigStore>,
        connector: Arc<dyn ApiConnector>,
        stop_grace: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                tasks: Mutex::new(HashMap::new()),
                user_locks: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                store,
                connector,
                stop_grace,
            }),
        }
    }

    /// Starts a grab task for `user_id`, superseding any task already running.
    ///
    /// Persists `grab` with `enabled` and `is_running` set, then spawns the
    /// worker and returns without waiting on it.
    pub async fn start(&self, user_id: UserId, grab: GrabConfig, responder: Arc<dyn Responder>) {
        {
            let user_lock = self.inner.user_lock(user_id);
            let _guard = user_lock.lock().await;
            self.start_locked(user_id, grab, responder).await;
        }
        self.inner.release_user_lock(user_id);
    }

    async fn start_locked(&self, user_id: UserId, grab: GrabConfig, responder: Arc<dyn Responder>) {
        if self.inner.stop_locked(user_id).await {
            info!("Superseded previous grab task for user {}", user_id);
        }

        let grab = GrabConfig {
            enabled: true,
            is_running: true,
            ..grab
        };
        let persisted = grab.clone();
        self.inner
            .store
            .update(
                user_id,
                Box::new(move |config| config.grab_config = Some(persisted)),
            )
            .await;

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let cancel = CancellationToken::new();
        let grab_loop = GrabLoop {
            user_id,
            grab,
            store: self.inner.store.clone(),
            connector: self.inner.connector.clone(),
            responder,
        };

        // Insert before the worker can reach its own cleanup.
        let mut tasks = self.inner.tasks.lock();
        let worker = tokio::spawn(run_worker(
            self.inner.clone(),
            user_id,
            generation,
            grab_loop,
            cancel.clone(),
        ));
        tasks.insert(
            user_id,
            GrabTaskHandle {
                generation,
                cancel,
                worker: Some(worker),
            },
        );
        info!("Started grab task {} for user {}", generation, user_id);
    }

    /// Cancels the user's grab task. Returns `false` if none was registered.
    pub async fn stop(&self, user_id: UserId) -> bool {
        let stopped = {
            let user_lock = self.inner.user_lock(user_id);
            let _guard = user_lock.lock().await;
            self.inner.stop_locked(user_id).await
        };
        self.inner.release_user_lock(user_id);
        stopped
    }

    /// Stored grab configuration for `user_id`.
    pub async fn status(&self, user_id: UserId) -> Option<GrabConfig> {
        self.inner.store.load(user_id).await.grab_config
    }

    pub fn is_active(&self, user_id: UserId) -> bool {
        self.inner.tasks.lock().contains_key(&user_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner.tasks.lock().len()
    }

    /// Restarts every stored grab that was running when the process last exited.
    pub async fn resume_all(&self, responder: Arc<dyn Responder>) -> usize {
        let mut configs: Vec<_> = self.inner.store.load_all().await.into_iter().collect();
        configs.sort_by_key(|(user_id, _)| *user_id);

        let mut resumed = 0;
        for (user_id, config) in configs {
            if !config.wants_resume() {
                continue;
            }
            let Some(grab) = config.grab_config else {
                continue;
            };

            info!("Resuming grab task for user {}", user_id);
            self.start(user_id, grab, responder.clone()).await;
            responder
                .notify(user_id, "System restarted, grab task resumed automatically")
                .await;
            resumed += 1;
        }
        resumed
    }

    /// Cancels every worker but leaves `is_running` persisted so the tasks
    /// resume on the next start.
    pub async fn shutdown(&self) {
        let handles: Vec<(UserId, GrabTaskHandle)> = self.inner.tasks.lock().drain().collect();
        if handles.is_empty() {
            return;
        }

        info!("Shutting down {} grab task(s)", handles.len());
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        for (user_id, mut handle) in handles {
            if let Some(worker) = handle.worker.take() {
                if tokio::time::timeout(self.inner.stop_grace, worker).await.is_err() {
                    debug!("Grab worker for user {} did not exit in time", user_id);
                }
            }
        }
    }
}

impl RegistryInner {
    fn user_lock(&self, user_id: UserId) -> Arc<tokio::sync::Mutex<()>> {
        self.user_locks
            .lock()
            .entry(user_id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Drops the user's lock once no caller holds or waits on it.
    fn release_user_lock(&self, user_id: UserId) {
        let mut locks = self.user_locks.lock();
        if locks
            .get(&user_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&user_id);
        }
    }

    /// Stop path shared by `stop` and `start`. Caller holds the user lock.
    async fn stop_locked(&self, user_id: UserId) -> bool {
        let (generation, worker) = {
            let mut tasks = self.tasks.lock();
            let Some(handle) = tasks.get_mut(&user_id) else {
                return false;
            };
            handle.cancel.cancel();
            (handle.generation, handle.worker.take())
        };

        self.set_running(user_id, false).await;

        if let Some(worker) = worker {
            if tokio::time::timeout(self.stop_grace, worker).await.is_err() {
                debug!(
                    "Grab worker {} for user {} still draining after {:?}",
                    generation, user_id, self.stop_grace
                );
            }
        }

        self.deregister(user_id, generation);
        info!("Stopped grab task {} for user {}", generation, user_id);
        true
    }

    /// Removes the entry only if it still belongs to `generation`.
    fn deregister(&self, user_id: UserId, generation: u64) -> bool {
        let mut tasks = self.tasks.lock();
        match tasks.get(&user_id) {
            Some(handle) if handle.generation == generation => {
                tasks.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    async fn set_running(&self, user_id: UserId, running: bool) {
        self.store
            .update(
                user_id,
                Box::new(move |config| {
                    if let Some(grab) = config.grab_config.as_mut() {
                        grab.is_running = running;
                    }
                }),
            )
            .await;
    }

    /// Cleanup for a worker that ended on its own.
    async fn finish(&self, user_id: UserId, generation: u64) {
        {
            let user_lock = self.user_lock(user_id);
            let _guard = user_lock.lock().await;
            if self.deregister(user_id, generation) {
                self.set_running(user_id, false).await;
            }
        }
        self.release_user_lock(user_id);
    }
}

async fn run_worker(
    inner: Arc<RegistryInner>,
    user_id: UserId,
    generation: u64,
    grab_loop: GrabLoop,
    cancel: CancellationToken,
) {
    let mut guard = WorkerGuard {
        inner: Some(inner),
        user_id,
        generation,
        cancel: cancel.clone(),
    };

    let exit = grab_loop.run(&cancel).await;
    debug!("Grab task {} for user {} exited: {:?}", generation, user_id, exit);

    if exit == LoopExit::Cancelled {
        // Whoever cancelled owns the cleanup.
        guard.disarm();
        return;
    }
    if let Some(inner) = guard.disarm() {
        inner.finish(user_id, generation).await;
    }
}

/// Restores registry and store state if a worker unwinds.
struct WorkerGuard {
    inner: Option<Arc<RegistryInner>>,
    user_id: UserId,
    generation: u64,
    cancel: CancellationToken,
}

impl WorkerGuard {
    fn disarm(&mut self) -> Option<Arc<RegistryInner>> {
        self.inner.take()
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        if self.cancel.is_cancelled() {
            return;
        }

        error!(
            "Grab task {} for user {} ended abnormally, cleaning up",
            self.generation, self.user_id
        );
        let (user_id, generation) = (self.user_id, self.generation);
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move { inner.finish(user_id, generation).await });
        } else {
            inner.deregister(user_id, generation);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use autodl_claw_interfaces::ChannelResponder;
    use autodl_claw_memory::InMemoryConfigStore;
    use autodl_claw_providers::ComputeApi;

    struct NoConnector;

    impl ApiConnector for NoConnector {
        fn connect(&self, _username: &str, _password: &str) -> Arc<dyn ComputeApi> {
            panic!("no API session expected without credentials");
        }
    }

    fn registry() -> GrabTaskRegistry {
        GrabTaskRegistry::new(Arc::new(InMemoryConfigStore::new()), Arc::new(NoConnector))
    }

    fn tracked_locks(registry: &GrabTaskRegistry) -> usize {
        registry.inner.user_locks.lock().len()
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_locks_released_after_stop() {
        let registry = registry();

        for user_id in 0..50 {
            assert!(!registry.stop(user_id).await);
        }

        assert_eq!(tracked_locks(&registry), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_locks_released_after_worker_finishes() {
        let registry = registry();
        let (responder, mut rx) = ChannelResponder::new();

        registry
            .start(3, GrabConfig::default().targeting_gpu("A100"), Arc::new(responder))
            .await;
        assert_eq!(
            rx.recv().await.unwrap().text,
            "Grab failed: username or password not set"
        );
        for _ in 0..100 {
            if !registry.is_active(3) && tracked_locks(&registry) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!registry.is_active(3));
        assert_eq!(tracked_locks(&registry), 0);
    }

    #[tokio::test]
    async fn test_held_lock_survives_release() {
        let registry = registry();
        let held = registry.inner.user_lock(4);
        let _guard = held.lock().await;

        registry.inner.release_user_lock(4);

        assert_eq!(tracked_locks(&registry), 1);
        assert!(Arc::ptr_eq(&held, &registry.inner.user_lock(4)));
    }
}
