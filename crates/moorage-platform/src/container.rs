//! Container platform capability interface.
//!
//! ECS, Swarm, and Kubernetes adapters all implement [`ContainerPlatform`];
//! the orchestrator and the task schedulers depend only on this trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use moorage_core::Resources;

use crate::error::PlatformResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlatformKind {
    Ecs,
    Swarm,
    Kubernetes,
}

impl PlatformKind {
    /// Kubernetes detaches volumes itself when pods go away.
    pub fn detaches_volumes(self) -> bool {
        self == Self::Kubernetes
    }
}

/// Replica counts reported by the platform.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServiceRunStatus {
    pub running: u32,
    pub desired: u32,
}

impl ServiceRunStatus {
    pub fn all_running(&self) -> bool {
        self.desired != 0 && self.running == self.desired
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerServiceOptions {
    pub cluster: String,
    pub service_name: String,
    pub service_uuid: String,
    pub container_image: String,
    pub replicas: u32,
    pub resources: Resources,
    pub env: Vec<(String, String)>,
}

/// A one-shot task launched next to a service, e.g. an init job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunTaskOptions {
    pub cluster: String,
    pub service_name: String,
    pub service_uuid: String,
    pub container_image: String,
    pub task_type: String,
    pub resources: Resources,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStatus {
    pub state: TaskState,
    pub stopped_reason: Option<String>,
}

/// Volume registration for one member on the container platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceVolumeRequest {
    pub service_name: String,
    pub member_name: String,
    pub volume_id: String,
    pub size_gb: i64,
    pub journal: bool,
}

/// Receives progress text from long-running platform operations.
pub type StatusSink = Arc<dyn Fn(String) + Send + Sync>;

#[async_trait]
pub trait ContainerPlatform: Send + Sync {
    fn kind(&self) -> PlatformKind;

    async fn create_service(&self, opts: &ContainerServiceOptions) -> PlatformResult<()>;

    async fn scale_service(&self, cluster: &str, service: &str, desired: u32)
    -> PlatformResult<()>;

    async fn stop_service(&self, cluster: &str, service: &str) -> PlatformResult<()>;

    /// Restart replicas one at a time, reporting progress through `status`.
    async fn rolling_restart_service(
        &self,
        cluster: &str,
        service: &str,
        status: StatusSink,
    ) -> PlatformResult<()>;

    async fn delete_service(&self, cluster: &str, service: &str) -> PlatformResult<()>;

    async fn get_service_status(&self, cluster: &str, service: &str)
    -> PlatformResult<ServiceRunStatus>;

    /// Launch a task and return its ID.
    async fn run_task(&self, opts: &RunTaskOptions) -> PlatformResult<String>;

    async fn get_task_status(&self, cluster: &str, task_id: &str) -> PlatformResult<TaskStatus>;

    async fn delete_task(&self, cluster: &str, service: &str, task_type: &str)
    -> PlatformResult<()>;

    /// Register a volume for a member. Fails with
    /// [`PlatformError::VolumeExists`](crate::PlatformError::VolumeExists)
    /// carrying the existing ID if the member already has one.
    async fn create_service_volume(&self, req: &ServiceVolumeRequest) -> PlatformResult<()>;

    async fn delete_service_volume(
        &self,
        service: &str,
        member: &str,
        journal: bool,
    ) -> PlatformResult<()>;
}
