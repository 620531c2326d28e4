//! moorage.toml configuration parser.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::naming::default_domain;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MoorageConfig {
    pub cluster: ClusterConfig,
    pub store: StoreConfig,
    pub manage: ManageSection,
    pub tasks: TasksSection,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub name: String,
    pub region: String,
    pub vpc_id: String,
    pub domain: Option<String>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            region: "us-east-1".to_string(),
            vpc_id: "vpc-local".to_string(),
            domain: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/moorage/moorage.redb"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManageSection {
    pub max_retry_count: u32,
    pub retry_wait: String,
    pub default_host_ip: String,
}

impl Default for ManageSection {
    fn default() -> Self {
        Self {
            max_retry_count: 3,
            retry_wait: "2s".to_string(),
            default_host_ip: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksSection {
    pub max_tasks: usize,
    pub poll_interval: String,
    pub service_wait: String,
    pub task_wait: String,
    pub stabilize_delay: String,
    pub retry_count: u32,
    pub done_grace: String,
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            max_tasks: 100,
            poll_interval: "3s".to_string(),
            service_wait: "120s".to_string(),
            task_wait: "120s".to_string(),
            stabilize_delay: "10s".to_string(),
            retry_count: 5,
            done_grace: "6s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl MoorageConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MoorageConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Scaffold a config for a named cluster with every default spelled out.
    pub fn scaffold(cluster: &str, region: &str, store_path: &Path) -> Self {
        MoorageConfig {
            cluster: ClusterConfig {
                name: cluster.to_string(),
                region: region.to_string(),
                domain: Some(default_domain(cluster)),
                ..ClusterConfig::default()
            },
            store: StoreConfig {
                path: store_path.to_path_buf(),
            },
            ..MoorageConfig::default()
        }
    }

    /// Service domain, falling back to `<cluster>-moorage.com`.
    pub fn domain(&self) -> String {
        self.cluster
            .domain
            .clone()
            .unwrap_or_else(|| default_domain(&self.cluster.name))
    }

    /// Reject durations that do not parse so failures surface at load time.
    pub fn validate(&self) -> anyhow::Result<()> {
        let durations = [
            ("manage.retry_wait", &self.manage.retry_wait),
            ("tasks.poll_interval", &self.tasks.poll_interval),
            ("tasks.service_wait", &self.tasks.service_wait),
            ("tasks.task_wait", &self.tasks.task_wait),
            ("tasks.stabilize_delay", &self.tasks.stabilize_delay),
            ("tasks.done_grace", &self.tasks.done_grace),
        ];
        for (field, value) in durations {
            if parse_duration(value).is_none() {
                anyhow::bail!("invalid duration for {field}: {value:?}");
            }
        }
        if self.cluster.name.is_empty() {
            anyhow::bail!("cluster.name must not be empty");
        }
        Ok(())
    }
}

/// Parse `"5s"`, `"500ms"`, `"2m"`, or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}
