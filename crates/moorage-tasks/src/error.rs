use thiserror::Error;

use moorage_platform::PlatformError;
use moorage_state::StateError;

pub type TaskResult<T> = Result<T, TaskError>;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task registry full: {0} tasks tracked")]
    Capacity(usize),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("failed to launch task: {0}")]
    Launch(#[source] PlatformError),

    #[error("service {0} is being deleted")]
    ServiceDeleting(String),

    #[error("service {0} not found")]
    ServiceNotFound(String),

    #[error("cancelled")]
    Cancelled,

    #[error("init task did not activate service {service_uuid} after {attempts} attempts")]
    RetriesExhausted { service_uuid: String, attempts: u32 },

    #[error(transparent)]
    State(#[from] StateError),
}
