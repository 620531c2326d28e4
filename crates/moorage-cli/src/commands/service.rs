//! Service commands. Each one opens the state store, runs a single
//! orchestrator call and prints the result.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use moorage_core::{CreateServiceRequest, MoorageConfig};
use moorage_manage::{ManageConfig, ManageService};
use moorage_platform::PlatformKind;
use moorage_platform::mem::{MemContainerPlatform, MemDns, MemServer};
use moorage_state::StateStore;

/// Build an orchestrator over the configured store. Cloud collaborators
/// are the in-process adapters.
pub fn open(config: &MoorageConfig) -> anyhow::Result<ManageService> {
    if let Some(parent) = config.store.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let state = StateStore::open(&config.store.path)?;
    info!(path = %config.store.path.display(), "state store opened");
    Ok(ManageService::new(
        state,
        Arc::new(MemContainerPlatform::new(PlatformKind::Ecs)),
        Arc::new(MemDns::new()),
        Arc::new(MemServer::new()),
        ManageConfig::from_config(config),
    ))
}

pub fn read_request(path: &Path) -> anyhow::Result<CreateServiceRequest> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

pub async fn create(svc: &ManageService, request: &Path) -> anyhow::Result<()> {
    let req = read_request(request)?;
    let uuid = svc.create_service(&req).await?;
    println!("✓ Service {} created: {uuid}", req.service);
    Ok(())
}

pub fn clusters(svc: &ManageService) -> anyhow::Result<()> {
    for name in svc.list_clusters()? {
        println!("{name}");
    }
    Ok(())
}

pub fn list(svc: &ManageService, cluster: &str) -> anyhow::Result<()> {
    let attrs = svc.list_services(cluster)?;
    if attrs.is_empty() {
        println!("No services in cluster {cluster}");
        return Ok(());
    }
    println!("{:<24} {:<10} {:<14} {:>8}", "NAME", "TYPE", "STATUS", "REPLICAS");
    for attr in attrs {
        println!(
            "{:<24} {:<10} {:<14} {:>8}",
            attr.meta.name, attr.meta.service_type, attr.meta.status, attr.spec.replicas
        );
    }
    Ok(())
}

pub fn show(svc: &ManageService, cluster: &str, service: &str) -> anyhow::Result<()> {
    let attr = svc.get_service_attr(cluster, service)?;
    let members = svc.list_service_members(cluster, service)?;
    let out = serde_json::json!({
        "attr": attr,
        "members": members,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

pub fn volumes(svc: &ManageService, cluster: &str, service: &str) -> anyhow::Result<()> {
    let ids = svc.list_service_volumes(cluster, service)?;
    for id in &ids.primary {
        println!("primary {id}");
    }
    for id in &ids.journal {
        println!("journal {id}");
    }
    Ok(())
}

pub async fn initialized(svc: &ManageService, cluster: &str, service: &str) -> anyhow::Result<()> {
    svc.set_service_initialized(cluster, service).await?;
    println!("✓ Service {cluster}/{service} is active");
    Ok(())
}

pub fn update_config(
    svc: &ManageService,
    cluster: &str,
    service: &str,
    member: &str,
    file_name: &str,
    from: &Path,
) -> anyhow::Result<()> {
    let content = std::fs::read_to_string(from)?;
    let id = svc.update_member_config(cluster, service, member, file_name, &content)?;
    println!("✓ {member}/{file_name} now at {}", id.file_id);
    Ok(())
}

pub async fn delete(svc: &ManageService, cluster: &str, service: &str) -> anyhow::Result<()> {
    let volumes = svc.delete_service(cluster, service).await?;
    println!("✓ Service {cluster}/{service} deleted");
    if !volumes.is_empty() {
        println!("Volumes left to reclaim:");
        for id in volumes {
            println!("  {id}");
        }
    }
    Ok(())
}
