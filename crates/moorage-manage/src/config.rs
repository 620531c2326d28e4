use std::time::Duration;

use moorage_core::{MoorageConfig, parse_duration};

/// Cluster identity and retry bounds for the orchestrator.
#[derive(Debug, Clone)]
pub struct ManageConfig {
    pub cluster: String,
    pub region: String,
    pub vpc_id: String,
    pub domain: String,
    /// Bound for device-create, IP-assign, status and table-ready retries.
    pub max_retry_count: u32,
    pub retry_wait: Duration,
    /// DNS placeholder for members without a static IP.
    pub default_host_ip: String,
}

impl ManageConfig {
    pub fn new(cluster: &str, region: &str, vpc_id: &str) -> Self {
        Self {
            cluster: cluster.to_string(),
            region: region.to_string(),
            vpc_id: vpc_id.to_string(),
            domain: moorage_core::default_domain(cluster),
            max_retry_count: 3,
            retry_wait: Duration::from_secs(2),
            default_host_ip: "127.0.0.1".to_string(),
        }
    }

    pub fn from_config(config: &MoorageConfig) -> Self {
        Self {
            cluster: config.cluster.name.clone(),
            region: config.cluster.region.clone(),
            vpc_id: config.cluster.vpc_id.clone(),
            domain: config.domain(),
            max_retry_count: config.manage.max_retry_count,
            retry_wait: parse_duration(&config.manage.retry_wait).unwrap_or(Duration::from_secs(2)),
            default_host_ip: config.manage.default_host_ip.clone(),
        }
    }
}
