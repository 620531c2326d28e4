use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::dns::DnsProvider;
use crate::error::{PlatformError, PlatformResult};

#[derive(Default)]
struct Inner {
    /// domain → hosted zone ID.
    zones: HashMap<String, String>,
    /// (zone ID, dns name) → IP.
    records: HashMap<(String, String), String>,
}

/// Process-local DNS provider.
#[derive(Default)]
pub struct MemDns {
    inner: Mutex<Inner>,
}

impl MemDns {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self) -> usize {
        self.inner.lock().await.records.len()
    }
}

#[async_trait]
impl DnsProvider for MemDns {
    async fn get_or_create_hosted_zone_id(
        &self,
        domain: &str,
        _vpc_id: &str,
        _region: &str,
    ) -> PlatformResult<String> {
        let mut inner = self.inner.lock().await;
        let next = inner.zones.len() + 1;
        Ok(inner
            .zones
            .entry(domain.to_string())
            .or_insert_with(|| format!("zone-{next}"))
            .clone())
    }

    async fn update_dns_record(
        &self,
        dns_name: &str,
        host_ip: &str,
        hosted_zone_id: &str,
    ) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner.records.insert(
            (hosted_zone_id.to_string(), dns_name.to_string()),
            host_ip.to_string(),
        );
        Ok(())
    }

    async fn get_dns_record(&self, dns_name: &str, hosted_zone_id: &str) -> PlatformResult<String> {
        let inner = self.inner.lock().await;
        inner
            .records
            .get(&(hosted_zone_id.to_string(), dns_name.to_string()))
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(dns_name.to_string()))
    }

    async fn delete_dns_record(
        &self,
        dns_name: &str,
        host_ip: &str,
        hosted_zone_id: &str,
    ) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        let key = (hosted_zone_id.to_string(), dns_name.to_string());
        let current = inner.records.get(&key).cloned();
        match current {
            Some(ip) if ip == host_ip => {
                inner.records.remove(&key);
                Ok(())
            }
            Some(ip) => Err(PlatformError::Request(format!(
                "{dns_name} points at {ip}, not {host_ip}"
            ))),
            None => Err(PlatformError::NotFound(dns_name.to_string())),
        }
    }
}
