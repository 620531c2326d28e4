//! moorage-tasks: background supervisors for long-running service work.
//!
//! Both registries here are owned components, not globals: the service
//! process constructs one of each and hands out `Arc`s. Each registry holds
//! at most one live entry per service UUID and caps the total number of
//! entries.
//!
//! - [`InitTaskScheduler`] drives a freshly created service from
//!   `Initializing` to `Active` by running its init task.
//! - [`ManageTaskService`] runs rolling restarts.

pub mod config;
pub mod error;
pub mod init;
pub mod manage;

pub use config::{InitTaskConfig, ManageTaskConfig};
pub use error::{TaskError, TaskResult};
pub use init::{InitTask, InitTaskScheduler};
pub use manage::{ManageTask, ManageTaskService, ManageTaskStatus};
