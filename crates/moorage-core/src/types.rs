//! Request types handed to the orchestrator by catalog generators.
//!
//! Everything here is plain data: the orchestrator treats config file
//! contents as opaque blobs and only cares about counts, zones, and
//! volume sizes.

use serde::{Deserialize, Serialize};

/// Whether a service owns durable per-replica storage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    #[default]
    Stateful,
    Stateless,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(match self {
            Self::Stateful => "stateful",
            Self::Stateless => "stateless",
        })
    }
}

/// CPU and memory limits for each replica container. `-1` means unlimited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    #[serde(default = "default_unlimited")]
    pub max_cpu_units: i64,
    #[serde(default = "default_reserve")]
    pub reserve_cpu_units: i64,
    #[serde(default = "default_unlimited")]
    pub max_memory_mb: i64,
    #[serde(default = "default_reserve")]
    pub reserve_memory_mb: i64,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            max_cpu_units: default_unlimited(),
            reserve_cpu_units: default_reserve(),
            max_memory_mb: default_unlimited(),
            reserve_memory_mb: default_reserve(),
        }
    }
}

fn default_unlimited() -> i64 {
    -1
}

fn default_reserve() -> i64 {
    256
}

/// Block volume requested for every replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    pub size_gb: i64,
    #[serde(default)]
    pub iops: i64,
    #[serde(default)]
    pub encrypted: bool,
}

fn default_volume_type() -> String {
    "gp2".to_string()
}

/// One generated config file, e.g. `cassandra.yaml` or `server.properties`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFileContent {
    pub file_name: String,
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,
    pub content: String,
}

fn default_file_mode() -> u32 {
    0o600
}

/// Placement and config files for one replica, in ordinal order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaConfig {
    pub zone: String,
    #[serde(default)]
    pub configs: Vec<ConfigFileContent>,
}

/// Fully-qualified service identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceId {
    pub region: String,
    pub cluster: String,
    pub name: String,
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.cluster, self.name)
    }
}

/// A "create N-replica service" request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateServiceRequest {
    pub service: ServiceId,
    #[serde(default)]
    pub service_type: ServiceType,
    #[serde(default)]
    pub catalog_service_type: String,
    pub replicas: u32,
    #[serde(default)]
    pub resources: Resources,
    #[serde(default)]
    pub volume: Option<VolumeSpec>,
    #[serde(default)]
    pub journal_volume: Option<VolumeSpec>,
    #[serde(default = "default_true")]
    pub register_dns: bool,
    #[serde(default)]
    pub require_static_ip: bool,
    #[serde(default)]
    pub service_configs: Vec<ConfigFileContent>,
    #[serde(default)]
    pub replica_configs: Vec<ReplicaConfig>,
}

fn default_true() -> bool {
    true
}

impl CreateServiceRequest {
    pub fn is_stateful(&self) -> bool {
        self.service_type == ServiceType::Stateful
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_from_toml_applies_defaults() {
        let toml_str = r#"
replicas = 1

[service]
region = "us-east-1"
cluster = "c1"
name = "pg"

[volume]
size_gb = 10

[[replica_configs]]
zone = "us-east-1a"

[[replica_configs.configs]]
file_name = "postgresql.conf"
content = "port = 5432"
"#;
        let req: CreateServiceRequest = toml::from_str(toml_str).unwrap();
        assert!(req.is_stateful());
        assert!(req.register_dns);
        assert!(!req.require_static_ip);
        assert_eq!(req.resources, Resources::default());

        let vol = req.volume.unwrap();
        assert_eq!(vol.volume_type, "gp2");
        assert_eq!(vol.size_gb, 10);

        assert_eq!(req.replica_configs.len(), 1);
        assert_eq!(req.replica_configs[0].configs[0].file_mode, 0o600);
    }

    #[test]
    fn service_id_display() {
        let id = ServiceId {
            region: "r".into(),
            cluster: "c1".into(),
            name: "kafka".into(),
        };
        assert_eq!(id.to_string(), "c1/kafka");
    }
}
