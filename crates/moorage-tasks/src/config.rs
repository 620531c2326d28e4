use std::time::Duration;

use moorage_core::config::{TasksSection, parse_duration};

/// Bounds for the init task supervisor.
#[derive(Debug, Clone)]
pub struct InitTaskConfig {
    /// Tasks tracked at once across all services.
    pub max_tasks: usize,
    pub poll_interval: Duration,
    /// How long to wait for every replica to report running.
    pub service_wait: Duration,
    /// How long to wait for one launched init task to stop.
    pub task_wait: Duration,
    /// Grace period between "all running" and the first launch.
    pub stabilize_delay: Duration,
    /// Launch attempts before giving up.
    pub retry_count: u32,
}

impl Default for InitTaskConfig {
    fn default() -> Self {
        Self::from_section(&TasksSection::default())
    }
}

impl InitTaskConfig {
    pub fn from_section(section: &TasksSection) -> Self {
        Self {
            max_tasks: section.max_tasks,
            poll_interval: parse_duration(&section.poll_interval).unwrap_or(Duration::from_secs(3)),
            service_wait: parse_duration(&section.service_wait).unwrap_or(Duration::from_secs(120)),
            task_wait: parse_duration(&section.task_wait).unwrap_or(Duration::from_secs(120)),
            stabilize_delay: parse_duration(&section.stabilize_delay)
                .unwrap_or(Duration::from_secs(10)),
            retry_count: section.retry_count,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ManageTaskConfig {
    pub max_tasks: usize,
    /// How long a finished task stays visible to pollers.
    pub done_grace: Duration,
}

impl Default for ManageTaskConfig {
    fn default() -> Self {
        Self::from_section(&TasksSection::default())
    }
}

impl ManageTaskConfig {
    pub fn from_section(section: &TasksSection) -> Self {
        Self {
            max_tasks: section.max_tasks,
            done_grace: parse_duration(&section.done_grace).unwrap_or(Duration::from_secs(6)),
        }
    }
}
