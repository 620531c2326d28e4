//! Error types for the service orchestrator.

use thiserror::Error;

use moorage_platform::PlatformError;
use moorage_state::StateError;
use moorage_tasks::TaskError;

/// Result type alias for orchestrator operations.
pub type ManageResult<T> = Result<T, ManageError>;

#[derive(Debug, Error)]
pub enum ManageError {
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("service already exists: {0}")]
    ServiceExist(String),

    #[error("service is being deleted: {0}")]
    ServiceDeleting(String),

    #[error("service is deleted: {0}")]
    ServiceDeleted(String),

    /// An optimistic write lost; re-read before retrying.
    #[error("conditional check failed: {0}")]
    ConditionalCheckFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("config file {0} exists with different content")]
    ConfigMismatch(String),

    #[error("system tables are still being created")]
    SystemCreating,

    #[error("store error: {0}")]
    State(StateError),

    #[error("platform error: {0}")]
    Platform(PlatformError),

    #[error("task error: {0}")]
    Task(TaskError),
}

impl From<StateError> for ManageError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::Conflict(msg) => Self::ConditionalCheckFailed(msg),
            StateError::NotFound(msg) => Self::NotFound(msg),
            other => Self::State(other),
        }
    }
}

impl From<PlatformError> for ManageError {
    fn from(e: PlatformError) -> Self {
        match e {
            PlatformError::NotFound(msg) => Self::NotFound(msg),
            PlatformError::Timeout(msg) => Self::Timeout(msg),
            other => Self::Platform(other),
        }
    }
}

impl From<TaskError> for ManageError {
    fn from(e: TaskError) -> Self {
        match e {
            TaskError::Capacity(n) => Self::Internal(format!("init task registry full ({n} tasks)")),
            other => Self::Task(other),
        }
    }
}
