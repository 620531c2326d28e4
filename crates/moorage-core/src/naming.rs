//! Deterministic names and identifiers.
//!
//! Member names, DNS names, and config file IDs must be reproducible from
//! the request alone so that a retried create lands on the same records.

use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Name of the replica at `index`, e.g. `kafka-0`.
pub fn member_name(service: &str, index: u32) -> String {
    format!("{service}-{index}")
}

/// Default DNS domain for services in a cluster.
pub fn default_domain(cluster: &str) -> String {
    format!("{cluster}-moorage.com")
}

/// DNS name of a member within the service domain.
pub fn dns_name(member: &str, domain: &str) -> String {
    format!("{member}.{domain}")
}

/// Hex SHA-256 of arbitrary content.
pub fn content_digest(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// Config file ID: `<prefix>-<digest(file_name)>-<version>`.
///
/// The digest is truncated to 32 hex characters; it only has to
/// disambiguate file names within one prefix.
pub fn config_file_id(prefix: &str, file_name: &str, version: u64) -> String {
    let digest = content_digest(file_name);
    format!("{prefix}-{}-{version}", &digest[..32])
}

/// Version suffix of a config file ID.
pub fn config_file_version(file_id: &str) -> Option<u64> {
    file_id.rsplit_once('-')?.1.parse().ok()
}

/// Fresh service UUID.
pub fn gen_service_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Correlation ID attached to a request and to any background work it starts.
pub fn gen_request_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
