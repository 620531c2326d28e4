//! DNS provider interface.

use async_trait::async_trait;

use crate::error::PlatformResult;

#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Look up the hosted zone for `domain`, creating a private zone bound
    /// to the VPC if none exists.
    async fn get_or_create_hosted_zone_id(
        &self,
        domain: &str,
        vpc_id: &str,
        region: &str,
    ) -> PlatformResult<String>;

    /// Upsert an A record.
    async fn update_dns_record(
        &self,
        dns_name: &str,
        host_ip: &str,
        hosted_zone_id: &str,
    ) -> PlatformResult<()>;

    /// Current IP of an A record.
    async fn get_dns_record(&self, dns_name: &str, hosted_zone_id: &str) -> PlatformResult<String>;

    async fn delete_dns_record(
        &self,
        dns_name: &str,
        host_ip: &str,
        hosted_zone_id: &str,
    ) -> PlatformResult<()>;
}
