//! Init task scheduler: supervises one-shot service initialization.
//!
//! After the orchestrator has materialized every member, a service sits in
//! `Initializing` until its service-specific init task (replica set
//! bootstrap, topic creation, ...) has run. `InitTaskScheduler` keeps at
//! most one supervisor per service. Each supervisor:
//!
//! 1. polls the container platform until every replica is running,
//! 2. waits a stabilization delay,
//! 3. exits early if the service is already `Active`,
//! 4. launches the init task and waits for it to stop, re-checking for
//!    `Active` after every attempt, up to `retry_count` attempts.
//!
//! Whatever the outcome, the platform task is deleted and the registry
//! slot freed. A service left in `Initializing` is picked up again the
//! next time a caller adds the task.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, sleep};
use tracing::{Instrument, debug, error, info, info_span, warn};

use moorage_platform::{ContainerPlatform, RunTaskOptions, TaskState};
use moorage_state::{ServiceStatus, StateStore};

use crate::config::InitTaskConfig;
use crate::error::{TaskError, TaskResult};

/// Work handed to the scheduler by the service layer.
#[derive(Debug, Clone)]
pub struct InitTask {
    pub cluster: String,
    pub service_name: String,
    pub service_uuid: String,
    /// Correlation ID of the request that triggered the task.
    pub requuid: String,
    pub run_opts: RunTaskOptions,
}

struct TaskSlot {
    status: String,
    cancel: watch::Sender<bool>,
}

type Registry = Arc<Mutex<HashMap<String, TaskSlot>>>;

/// Registry of running init supervisors, keyed by service UUID.
pub struct InitTaskScheduler {
    state: StateStore,
    platform: Arc<dyn ContainerPlatform>,
    config: InitTaskConfig,
    tasks: Registry,
}

impl InitTaskScheduler {
    pub fn new(state: StateStore, platform: Arc<dyn ContainerPlatform>, config: InitTaskConfig) -> Self {
        Self {
            state,
            platform,
            config,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start supervising `task` unless its service already has a supervisor.
    ///
    /// Must be called from within a tokio runtime. The supervisor is
    /// detached from the caller and outlives it.
    pub fn add_init_task(&self, task: InitTask) -> TaskResult<()> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        {
            let mut tasks = self.tasks.lock();
            if tasks.contains_key(&task.service_uuid) {
                info!(service_uuid = %task.service_uuid, requuid = %task.requuid, "init task already running");
                return Ok(());
            }
            if tasks.len() >= self.config.max_tasks {
                error!(max_tasks = self.config.max_tasks, service_uuid = %task.service_uuid, "init task registry full");
                return Err(TaskError::Capacity(tasks.len()));
            }
            tasks.insert(
                task.service_uuid.clone(),
                TaskSlot {
                    status: "waiting for service containers to start".to_string(),
                    cancel: cancel_tx,
                },
            );
        }

        let span = info_span!("init_task", requuid = %task.requuid, service_uuid = %task.service_uuid);
        let supervisor = Supervisor {
            state: self.state.clone(),
            platform: self.platform.clone(),
            config: self.config.clone(),
            tasks: self.tasks.clone(),
        };
        info!(service = %task.service_name, service_uuid = %task.service_uuid, "init task added");
        tokio::spawn(supervisor.run(task, cancel_rx).instrument(span));
        Ok(())
    }

    /// Status text of the service's live init task, if any.
    pub fn has_init_task(&self, service_uuid: &str) -> Option<String> {
        self.tasks.lock().get(service_uuid).map(|slot| slot.status.clone())
    }

    pub fn update_task_status_msg(&self, service_uuid: &str, msg: &str) {
        set_status(&self.tasks, service_uuid, msg);
    }

    /// Ask the service's supervisor to stop. Cleanup still runs.
    /// Returns false if no task was running.
    pub fn cancel_init_task(&self, service_uuid: &str) -> bool {
        let tasks = self.tasks.lock();
        match tasks.get(service_uuid) {
            Some(slot) => {
                let _ = slot.cancel.send(true);
                info!(%service_uuid, "init task cancel requested");
                true
            }
            None => false,
        }
    }

    pub fn task_count(&self) -> usize {
        self.tasks.lock().len()
    }
}

fn set_status(tasks: &Registry, service_uuid: &str, msg: &str) {
    if let Some(slot) = tasks.lock().get_mut(service_uuid) {
        slot.status = msg.to_string();
    }
}

/// Frees the registry slot on every exit path, including panics.
struct SlotGuard {
    tasks: Registry,
    service_uuid: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.tasks.lock().remove(&self.service_uuid);
        debug!(service_uuid = %self.service_uuid, "init task removed");
    }
}

struct Supervisor {
    state: StateStore,
    platform: Arc<dyn ContainerPlatform>,
    config: InitTaskConfig,
    tasks: Registry,
}

impl Supervisor {
    async fn run(self, task: InitTask, mut cancel: watch::Receiver<bool>) {
        let guard = SlotGuard {
            tasks: self.tasks.clone(),
            service_uuid: task.service_uuid.clone(),
        };

        let outcome = tokio::select! {
            result = self.drive(&task) => result,
            _ = cancel.changed() => Err(TaskError::Cancelled),
        };
        match &outcome {
            Ok(()) => info!(service = %task.service_name, "service initialized"),
            Err(TaskError::Cancelled) => info!(service = %task.service_name, "init task cancelled"),
            Err(e) => warn!(service = %task.service_name, error = %e, "init task ended without activating service"),
        }

        if let Err(e) = self
            .platform
            .delete_task(&task.cluster, &task.service_name, &task.run_opts.task_type)
            .await
        {
            error!(service = %task.service_name, error = %e, "failed to delete init task");
        }
        drop(guard);
    }

    async fn drive(&self, task: &InitTask) -> TaskResult<()> {
        self.wait_service_running(task).await?;

        self.status(task, "all service containers are running, waiting to start the init task");
        sleep(self.config.stabilize_delay).await;

        if self.service_active(task)? {
            info!(service = %task.service_name, "service already active");
            return Ok(());
        }

        for attempt in 1..=self.config.retry_count {
            self.status(task, "the init task is running");
            let task_id = self
                .platform
                .run_task(&task.run_opts)
                .await
                .map_err(TaskError::Launch)?;
            info!(%task_id, attempt, "init task launched");

            if let Err(e) = self.wait_task_stopped(task, &task_id).await {
                warn!(%task_id, attempt, error = %e, "init task did not stop in time");
            }

            if self.service_active(task)? {
                return Ok(());
            }
            warn!(%task_id, attempt, "service not active after init task");
        }

        Err(TaskError::RetriesExhausted {
            service_uuid: task.service_uuid.clone(),
            attempts: self.config.retry_count,
        })
    }

    async fn wait_service_running(&self, task: &InitTask) -> TaskResult<()> {
        let deadline = Instant::now() + self.config.service_wait;
        loop {
            match self
                .platform
                .get_service_status(&task.cluster, &task.service_name)
                .await
            {
                Ok(status) => {
                    self.status(
                        task,
                        &format!(
                            "waiting for service containers: {} of {} running",
                            status.running, status.desired
                        ),
                    );
                    if status.all_running() {
                        return Ok(());
                    }
                    debug!(running = status.running, desired = status.desired, "service not running yet");
                }
                Err(e) => warn!(error = %e, "failed to get service status"),
            }

            if Instant::now() >= deadline {
                return Err(TaskError::Timeout(format!(
                    "service {} containers not running after {:?}",
                    task.service_name, self.config.service_wait
                )));
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn wait_task_stopped(&self, task: &InitTask, task_id: &str) -> TaskResult<()> {
        let deadline = Instant::now() + self.config.task_wait;
        loop {
            match self.platform.get_task_status(&task.cluster, task_id).await {
                Ok(status) if status.state == TaskState::Stopped => {
                    debug!(%task_id, reason = ?status.stopped_reason, "init task stopped");
                    return Ok(());
                }
                Ok(status) => debug!(%task_id, state = ?status.state, "init task still running"),
                Err(e) => warn!(%task_id, error = %e, "failed to get init task status"),
            }

            if Instant::now() >= deadline {
                return Err(TaskError::Timeout(format!("init task {task_id}")));
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Whether the service reached `Active`. A missing or deleting service
    /// aborts the supervisor.
    fn service_active(&self, task: &InitTask) -> TaskResult<bool> {
        let attr = self
            .state
            .get_service_attr(&task.service_uuid)?
            .ok_or_else(|| TaskError::ServiceNotFound(task.service_uuid.clone()))?;
        match attr.meta.status {
            ServiceStatus::Active => Ok(true),
            ServiceStatus::Deleting | ServiceStatus::Deleted => {
                Err(TaskError::ServiceDeleting(task.service_name.clone()))
            }
            ServiceStatus::Creating | ServiceStatus::Initializing => Ok(false),
        }
    }

    fn status(&self, task: &InitTask, msg: &str) {
        set_status(&self.tasks, &task.service_uuid, msg);
    }
}
