use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::container::*;
use crate::error::{PlatformError, PlatformResult};

/// Invoked synchronously whenever a task is launched.
pub type RunTaskHook = Arc<dyn Fn(&RunTaskOptions) + Send + Sync>;

#[derive(Default)]
struct Inner {
    /// `{cluster}/{service}` → replica counts.
    services: HashMap<String, ServiceRunStatus>,
    /// task ID → (options, state).
    tasks: HashMap<String, (RunTaskOptions, TaskState)>,
    /// `{service}/{member}/{primary|journal}` → volume ID.
    volumes: HashMap<String, String>,
    run_task_calls: u32,
    delete_task_calls: u32,
    restarts: u32,
}

/// Process-local container platform. Replicas come up instantly unless
/// told otherwise; tasks finish on their first status poll.
pub struct MemContainerPlatform {
    kind: PlatformKind,
    inner: Mutex<Inner>,
    auto_start: bool,
    run_task_hook: Option<RunTaskHook>,
    fail_run_task: bool,
}

impl MemContainerPlatform {
    pub fn new(kind: PlatformKind) -> Self {
        Self {
            kind,
            inner: Mutex::new(Inner::default()),
            auto_start: true,
            run_task_hook: None,
            fail_run_task: false,
        }
    }

    /// Leave new services at zero running replicas until [`set_running`](Self::set_running).
    pub fn without_auto_start(mut self) -> Self {
        self.auto_start = false;
        self
    }

    pub fn with_run_task_hook(mut self, hook: RunTaskHook) -> Self {
        self.run_task_hook = Some(hook);
        self
    }

    pub fn with_failing_run_task(mut self) -> Self {
        self.fail_run_task = true;
        self
    }

    pub async fn set_running(&self, cluster: &str, service: &str, running: u32) {
        let mut inner = self.inner.lock().await;
        let status = inner.services.entry(service_key(cluster, service)).or_default();
        status.running = running;
    }

    pub async fn run_task_calls(&self) -> u32 {
        self.inner.lock().await.run_task_calls
    }

    pub async fn delete_task_calls(&self) -> u32 {
        self.inner.lock().await.delete_task_calls
    }

    pub async fn restarts(&self) -> u32 {
        self.inner.lock().await.restarts
    }

    pub async fn service_volume(&self, service: &str, member: &str, journal: bool) -> Option<String> {
        let inner = self.inner.lock().await;
        inner.volumes.get(&volume_key(service, member, journal)).cloned()
    }
}

fn service_key(cluster: &str, service: &str) -> String {
    format!("{cluster}/{service}")
}

fn volume_key(service: &str, member: &str, journal: bool) -> String {
    let kind = if journal { "journal" } else { "primary" };
    format!("{service}/{member}/{kind}")
}

#[async_trait]
impl ContainerPlatform for MemContainerPlatform {
    fn kind(&self) -> PlatformKind {
        self.kind
    }

    async fn create_service(&self, opts: &ContainerServiceOptions) -> PlatformResult<()> {
        let running = if self.auto_start { opts.replicas } else { 0 };
        let mut inner = self.inner.lock().await;
        inner
            .services
            .entry(service_key(&opts.cluster, &opts.service_name))
            .or_insert(ServiceRunStatus {
                running,
                desired: opts.replicas,
            });
        Ok(())
    }

    async fn scale_service(&self, cluster: &str, service: &str, desired: u32) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        let status = inner
            .services
            .get_mut(&service_key(cluster, service))
            .ok_or_else(|| PlatformError::NotFound(service_key(cluster, service)))?;
        status.desired = desired;
        if self.auto_start {
            status.running = desired;
        }
        Ok(())
    }

    async fn stop_service(&self, cluster: &str, service: &str) -> PlatformResult<()> {
        self.scale_service(cluster, service, 0).await
    }

    async fn rolling_restart_service(
        &self,
        cluster: &str,
        service: &str,
        status: StatusSink,
    ) -> PlatformResult<()> {
        let desired = self.get_service_status(cluster, service).await?.desired;
        for i in 0..desired {
            status(format!("restarting replica {} of {desired}", i + 1));
            tokio::task::yield_now().await;
        }
        self.inner.lock().await.restarts += 1;
        Ok(())
    }

    async fn delete_service(&self, cluster: &str, service: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.services.remove(&service_key(cluster, service));
        Ok(())
    }

    async fn get_service_status(&self, cluster: &str, service: &str) -> PlatformResult<ServiceRunStatus> {
        let inner = self.inner.lock().await;
        inner
            .services
            .get(&service_key(cluster, service))
            .copied()
            .ok_or_else(|| PlatformError::NotFound(service_key(cluster, service)))
    }

    async fn run_task(&self, opts: &RunTaskOptions) -> PlatformResult<String> {
        {
            let mut inner = self.inner.lock().await;
            inner.run_task_calls += 1;
        }
        if self.fail_run_task {
            return Err(PlatformError::Request(format!("run task {} refused", opts.task_type)));
        }
        if let Some(hook) = &self.run_task_hook {
            hook(opts);
        }
        let task_id = format!("task-{}", uuid::Uuid::new_v4().simple());
        let mut inner = self.inner.lock().await;
        inner
            .tasks
            .insert(task_id.clone(), (opts.clone(), TaskState::Running));
        debug!(%task_id, task_type = %opts.task_type, "task started");
        Ok(task_id)
    }

    async fn get_task_status(&self, _cluster: &str, task_id: &str) -> PlatformResult<TaskStatus> {
        let mut inner = self.inner.lock().await;
        let (_, state) = inner
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| PlatformError::NotFound(task_id.to_string()))?;
        let current = *state;
        *state = TaskState::Stopped;
        Ok(TaskStatus {
            state: current,
            stopped_reason: (current == TaskState::Stopped).then(|| "Essential container exited".to_string()),
        })
    }

    async fn delete_task(&self, cluster: &str, service: &str, task_type: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.delete_task_calls += 1;
        inner.tasks.retain(|_, (opts, _)| {
            !(opts.cluster == cluster && opts.service_name == service && opts.task_type == task_type)
        });
        Ok(())
    }

    async fn create_service_volume(&self, req: &ServiceVolumeRequest) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        let key = volume_key(&req.service_name, &req.member_name, req.journal);
        if let Some(existing) = inner.volumes.get(&key) {
            return Err(PlatformError::VolumeExists(existing.clone()));
        }
        inner.volumes.insert(key, req.volume_id.clone());
        Ok(())
    }

    async fn delete_service_volume(&self, service: &str, member: &str, journal: bool) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .volumes
            .remove(&volume_key(service, member, journal))
            .map(|_| ())
            .ok_or_else(|| PlatformError::NotFound(volume_key(service, member, journal)))
    }
}
