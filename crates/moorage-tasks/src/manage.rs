//! Manage tasks: background rolling restarts, one per service.
//!
//! Same registry discipline as the init scheduler, but the work is a single
//! platform call. A finished task stays registered for `done_grace` so a
//! client polling right after completion still sees the final message.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span};

use moorage_platform::{ContainerPlatform, StatusSink};

use crate::config::ManageTaskConfig;
use crate::error::{TaskError, TaskResult};

#[derive(Debug, Clone)]
pub struct ManageTask {
    pub cluster: String,
    pub service_name: String,
    pub service_uuid: String,
    pub requuid: String,
}

/// What a poller sees for a running or just-finished task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManageTaskStatus {
    pub status_message: String,
    pub complete: bool,
}

type Registry = Arc<Mutex<HashMap<String, ManageTaskStatus>>>;

pub struct ManageTaskService {
    platform: Arc<dyn ContainerPlatform>,
    config: ManageTaskConfig,
    tasks: Registry,
}

impl ManageTaskService {
    pub fn new(platform: Arc<dyn ContainerPlatform>, config: ManageTaskConfig) -> Self {
        Self {
            platform,
            config,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a rolling restart unless one is already tracked for the service.
    pub fn add_rolling_restart(&self, task: ManageTask) -> TaskResult<()> {
        {
            let mut tasks = self.tasks.lock();
            if tasks.contains_key(&task.service_uuid) {
                info!(service_uuid = %task.service_uuid, requuid = %task.requuid, "manage task already running");
                return Ok(());
            }
            if tasks.len() >= self.config.max_tasks {
                error!(max_tasks = self.config.max_tasks, "manage task registry full");
                return Err(TaskError::Capacity(tasks.len()));
            }
            tasks.insert(
                task.service_uuid.clone(),
                ManageTaskStatus {
                    status_message: "starting rolling restart".to_string(),
                    complete: false,
                },
            );
        }

        let span = info_span!("rolling_restart", requuid = %task.requuid, service_uuid = %task.service_uuid);
        let platform = self.platform.clone();
        let tasks = self.tasks.clone();
        let grace = self.config.done_grace;
        tokio::spawn(
            async move {
                let key = task.service_uuid.clone();
                let _slot = RestartSlot {
                    tasks: tasks.clone(),
                    service_uuid: key.clone(),
                };
                let sink_tasks = tasks.clone();
                let sink_key = key.clone();
                let sink: StatusSink = Arc::new(move |msg: String| {
                    if let Some(entry) = sink_tasks.lock().get_mut(&sink_key) {
                        entry.status_message = msg;
                    }
                });

                let message = match platform
                    .rolling_restart_service(&task.cluster, &task.service_name, sink)
                    .await
                {
                    Ok(()) => {
                        info!(service = %task.service_name, "rolling restart complete");
                        "rolling restart complete".to_string()
                    }
                    Err(e) => {
                        error!(service = %task.service_name, error = %e, "rolling restart failed");
                        format!("rolling restart failed: {e}")
                    }
                };
                if let Some(entry) = tasks.lock().get_mut(&key) {
                    entry.status_message = message;
                    entry.complete = true;
                }

                sleep(grace).await;
            }
            .instrument(span),
        );
        info!("rolling restart added");
        Ok(())
    }

    pub fn get_task_status(&self, service_uuid: &str) -> Option<ManageTaskStatus> {
        self.tasks.lock().get(service_uuid).cloned()
    }
}

/// Drops the registry entry when the restart task ends, however it ends.
struct RestartSlot {
    tasks: Registry,
    service_uuid: String,
}

impl Drop for RestartSlot {
    fn drop(&mut self) {
        self.tasks.lock().remove(&self.service_uuid);
        debug!(service_uuid = %self.service_uuid, "manage task removed");
    }
}
