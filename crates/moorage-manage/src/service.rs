//! ManageService: the service lifecycle state machine.
//!
//! `create_service` turns a request into durable records step by step.
//! Every step either creates-if-absent or adopts what an earlier attempt
//! left behind, so a caller that crashed or timed out can simply retry the
//! same request.

use std::sync::Arc;

use tokio::time::sleep;
use tracing::{error, info, warn};

use moorage_core::{CreateServiceRequest, ServiceType, epoch_secs, gen_service_uuid};
use moorage_platform::{CloudServer, ContainerPlatform, DnsProvider, RunTaskOptions};
use moorage_state::*;
use moorage_tasks::{InitTask, InitTaskScheduler};

use crate::config::ManageConfig;
use crate::configfile;
use crate::device::DeviceAllocator;
use crate::error::{ManageError, ManageResult};
use crate::staticip::StaticIpAllocator;

/// Volume IDs of every member, split by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceVolumeIds {
    pub primary: Vec<String>,
    pub journal: Vec<String>,
}

/// Owns the orchestration logic for one cluster.
pub struct ManageService {
    pub(crate) state: StateStore,
    pub(crate) platform: Arc<dyn ContainerPlatform>,
    pub(crate) dns: Arc<dyn DnsProvider>,
    pub(crate) server: Arc<dyn CloudServer>,
    pub(crate) config: ManageConfig,
    pub(crate) devices: DeviceAllocator,
    pub(crate) static_ips: StaticIpAllocator,
    init_tasks: Option<Arc<InitTaskScheduler>>,
}

impl ManageService {
    pub fn new(
        state: StateStore,
        platform: Arc<dyn ContainerPlatform>,
        dns: Arc<dyn DnsProvider>,
        server: Arc<dyn CloudServer>,
        config: ManageConfig,
    ) -> Self {
        let devices = DeviceAllocator::new(state.clone(), server.clone(), config.max_retry_count);
        let static_ips = StaticIpAllocator::new(
            state.clone(),
            server.clone(),
            &config.vpc_id,
            config.max_retry_count,
        );
        Self {
            state,
            platform,
            dns,
            server,
            config,
            devices,
            static_ips,
            init_tasks: None,
        }
    }

    /// Attach the init scheduler so deletes can cancel live init work.
    pub fn with_init_tasks(mut self, tasks: Arc<InitTaskScheduler>) -> Self {
        self.init_tasks = Some(tasks);
        self
    }

    pub fn config(&self) -> &ManageConfig {
        &self.config
    }

    pub fn device_allocator(&self) -> &DeviceAllocator {
        &self.devices
    }

    // ── Create ─────────────────────────────────────────────────────

    /// Create (or resume creating) a service. Returns its UUID.
    pub async fn create_service(&self, req: &CreateServiceRequest) -> ManageResult<String> {
        self.validate_request(req)?;
        self.check_and_create_system_tables().await?;

        let cluster = req.service.cluster.as_str();
        let name = req.service.name.as_str();

        let hosted_zone_id = self
            .dns
            .get_or_create_hosted_zone_id(&self.config.domain, &self.config.vpc_id, &req.service.region)
            .await?;

        let volumes = match req.service_type {
            ServiceType::Stateful => Some(self.create_service_volumes(cluster, name, req)?),
            ServiceType::Stateless => None,
        };

        let service_uuid = self.create_service_record(cluster, name)?;
        let service_configs =
            configfile::create_config_files(&self.state, &service_uuid, name, &req.service_configs)?;

        let now = epoch_secs();
        let attr = ServiceAttr {
            service_uuid: service_uuid.clone(),
            revision: 0,
            meta: ServiceMeta {
                cluster: cluster.to_string(),
                name: name.to_string(),
                create_time: now,
                last_modified: now,
                service_type: req.service_type,
                status: ServiceStatus::Creating,
            },
            spec: ServiceSpec {
                replicas: req.replicas,
                resources: req.resources.clone(),
                register_dns: req.register_dns,
                domain: self.config.domain.clone(),
                hosted_zone_id,
                require_static_ip: req.require_static_ip,
                service_configs,
                catalog_service_type: req.catalog_service_type.clone(),
                volumes,
            },
        };
        let attr = self.check_and_create_service_attr(attr)?;
        match attr.meta.status {
            ServiceStatus::Creating => {}
            ServiceStatus::Initializing | ServiceStatus::Active => {
                info!(%cluster, service = %name, status = %attr.meta.status, "service already created");
                return Ok(service_uuid);
            }
            ServiceStatus::Deleting => return Err(ManageError::ServiceDeleting(name.to_string())),
            ServiceStatus::Deleted => return Err(ManageError::ServiceDeleted(name.to_string())),
        }

        let members = self.check_and_create_service_members(&attr, req).await?;
        info!(%cluster, service = %name, members = members.len(), "service members ready");

        match self.update_status(attr, ServiceStatus::Initializing) {
            Ok(_) => {}
            Err(ManageError::ConditionalCheckFailed(msg)) => {
                let current = self.require_attr(&service_uuid)?;
                if current.meta.status != ServiceStatus::Active {
                    return Err(ManageError::ConditionalCheckFailed(msg));
                }
            }
            Err(e) => return Err(e),
        }
        info!(%cluster, service = %name, %service_uuid, "service created");
        Ok(service_uuid)
    }

    fn validate_request(&self, req: &CreateServiceRequest) -> ManageResult<()> {
        let invalid = |msg: String| Err(ManageError::InvalidArgs(msg));
        let svc = &req.service;
        if svc.cluster.is_empty() || svc.name.is_empty() || svc.region.is_empty() {
            return invalid("cluster, service name and region are required".to_string());
        }
        if svc.cluster != self.config.cluster {
            return invalid(format!("cluster {} is not managed here", svc.cluster));
        }
        if !is_valid_name(&svc.name) {
            return invalid(format!("service name {:?} must be letters, digits and '-'", svc.name));
        }

        let configs = req.replica_configs.len();
        match req.service_type {
            ServiceType::Stateful => {
                if req.replicas == 0 {
                    return invalid("stateful service needs at least one replica".to_string());
                }
                match &req.volume {
                    Some(v) if v.size_gb > 0 => {}
                    _ => return invalid("stateful service needs a volume with size > 0".to_string()),
                }
                if matches!(&req.journal_volume, Some(v) if v.size_gb <= 0) {
                    return invalid("journal volume size must be > 0".to_string());
                }
                if configs != req.replicas as usize {
                    return invalid(format!(
                        "{} replicas but {configs} replica configs",
                        req.replicas
                    ));
                }
            }
            ServiceType::Stateless => {
                if req.volume.is_some() || req.journal_volume.is_some() {
                    return invalid("stateless service cannot have volumes".to_string());
                }
                if configs != 0 && configs != req.replicas as usize {
                    return invalid(format!(
                        "{} replicas but {configs} replica configs",
                        req.replicas
                    ));
                }
                if req.require_static_ip && configs == 0 {
                    return invalid("static ips require replica configs".to_string());
                }
            }
        }
        Ok(())
    }

    /// Make sure the store is usable, creating tables and polling until ready.
    pub async fn check_and_create_system_tables(&self) -> ManageResult<()> {
        if self.state.tables_ready()? {
            return Ok(());
        }
        info!("creating system tables");
        self.state.create_tables()?;
        for attempt in 0..self.config.max_retry_count {
            if self.state.tables_ready()? {
                info!(attempt, "system tables ready");
                return Ok(());
            }
            sleep(self.config.retry_wait).await;
        }
        error!(retries = self.config.max_retry_count, "system tables not ready");
        Err(ManageError::SystemCreating)
    }

    /// Drop every system table. Used when decommissioning a cluster.
    pub fn delete_system_tables(&self) -> ManageResult<()> {
        let dropped = self.state.delete_tables()?;
        info!(dropped, "system tables deleted");
        Ok(())
    }

    fn create_service_volumes(
        &self,
        cluster: &str,
        name: &str,
        req: &CreateServiceRequest,
    ) -> ManageResult<ServiceVolumes> {
        let spec = req
            .volume
            .clone()
            .ok_or_else(|| ManageError::InvalidArgs("missing volume".to_string()))?;
        let primary_device = self.devices.create_device(cluster, name, None)?;
        let journal = match &req.journal_volume {
            Some(spec) => {
                let device = self.devices.create_device(cluster, name, Some(&primary_device))?;
                Some(DeviceVolume {
                    device_name: device,
                    spec: spec.clone(),
                })
            }
            None => None,
        };
        Ok(ServiceVolumes {
            primary: DeviceVolume {
                device_name: primary_device,
                spec,
            },
            journal,
        })
    }

    /// Create the name→UUID record, or return the UUID a previous attempt created.
    fn create_service_record(&self, cluster: &str, name: &str) -> ManageResult<String> {
        let service = Service {
            cluster: cluster.to_string(),
            name: name.to_string(),
            service_uuid: gen_service_uuid(),
        };
        match self.state.create_service(&service) {
            Ok(()) => {
                info!(%cluster, service = %name, service_uuid = %service.service_uuid, "service record created");
                Ok(service.service_uuid)
            }
            Err(e) if e.is_conflict() => {
                let existing = self.state.get_service(cluster, name)?.ok_or_else(|| {
                    ManageError::Internal(format!("service {name} vanished after conflict"))
                })?;
                info!(%cluster, service = %name, service_uuid = %existing.service_uuid, "service record exists");
                Ok(existing.service_uuid)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Create the attr, or adopt the stored one when it describes the same request.
    fn check_and_create_service_attr(&self, attr: ServiceAttr) -> ManageResult<ServiceAttr> {
        match self.state.create_service_attr(&attr) {
            Ok(()) => {
                info!(service_uuid = %attr.service_uuid, "service attr created");
                Ok(attr)
            }
            Err(e) if e.is_conflict() => {
                let stored = self.require_attr(&attr.service_uuid)?;
                if !stored.same_request(&attr) {
                    error!(service_uuid = %attr.service_uuid, "existing service has different attributes");
                    return Err(ManageError::ServiceExist(attr.meta.name));
                }
                info!(service_uuid = %attr.service_uuid, status = %stored.meta.status, "service attr exists");
                Ok(stored)
            }
            Err(e) => Err(e.into()),
        }
    }

    // ── Status transitions ─────────────────────────────────────────

    /// Move `attr` to `next` with a conditional write, re-reading on conflict.
    /// Already being at `next` is success; an illegal move is
    /// `ConditionalCheckFailed`.
    fn update_status(&self, mut attr: ServiceAttr, next: ServiceStatus) -> ManageResult<ServiceAttr> {
        for _ in 0..self.config.max_retry_count {
            let current = attr.meta.status;
            if current == next {
                return Ok(attr);
            }
            if !current.can_transition_to(next) {
                return Err(ManageError::ConditionalCheckFailed(format!(
                    "service {} is {current}, cannot become {next}",
                    attr.meta.name
                )));
            }
            let updated = attr.with_status(next);
            match self.state.update_service_attr(&attr, &updated) {
                Ok(()) => {
                    info!(service_uuid = %attr.service_uuid, from = %current, to = %next, "service status updated");
                    return Ok(updated);
                }
                Err(e) if e.is_conflict() => {
                    warn!(service_uuid = %attr.service_uuid, "service attr changed concurrently, re-reading");
                    attr = self.require_attr(&attr.service_uuid)?;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(ManageError::ConditionalCheckFailed(format!(
            "service {} kept changing while moving to {next}",
            attr.meta.name
        )))
    }

    /// Mark a service Active once its init task has run.
    pub async fn set_service_initialized(&self, cluster: &str, name: &str) -> ManageResult<()> {
        let service_uuid = self.get_service_uuid(cluster, name)?;
        let attr = self.require_attr(&service_uuid)?;
        if attr.meta.status == ServiceStatus::Active {
            info!(%cluster, service = %name, "service already active");
            return Ok(());
        }
        self.update_status(attr, ServiceStatus::Active)?;
        info!(%cluster, service = %name, "service initialized");
        Ok(())
    }

    /// Hand the service's init task to the scheduler.
    pub fn start_init_task(
        &self,
        cluster: &str,
        name: &str,
        container_image: &str,
        env: Vec<(String, String)>,
        requuid: &str,
    ) -> ManageResult<()> {
        let tasks = self
            .init_tasks
            .as_ref()
            .ok_or_else(|| ManageError::Internal("no init task scheduler configured".to_string()))?;
        let service_uuid = self.get_service_uuid(cluster, name)?;
        let attr = self.require_attr(&service_uuid)?;
        match attr.meta.status {
            ServiceStatus::Initializing => {}
            ServiceStatus::Active => return Ok(()),
            status => {
                return Err(ManageError::ConditionalCheckFailed(format!(
                    "service {name} is {status}, not initializing"
                )));
            }
        }
        tasks.add_init_task(InitTask {
            cluster: cluster.to_string(),
            service_name: name.to_string(),
            service_uuid: service_uuid.clone(),
            requuid: requuid.to_string(),
            run_opts: RunTaskOptions {
                cluster: cluster.to_string(),
                service_name: name.to_string(),
                service_uuid,
                container_image: container_image.to_string(),
                task_type: "init".to_string(),
                resources: attr.spec.resources.clone(),
                env,
            },
        })?;
        Ok(())
    }

    /// Current status text of the service's init task, if one is running.
    pub fn init_task_status(&self, cluster: &str, name: &str) -> ManageResult<Option<String>> {
        let service_uuid = self.get_service_uuid(cluster, name)?;
        Ok(self
            .init_tasks
            .as_ref()
            .and_then(|tasks| tasks.has_init_task(&service_uuid)))
    }

    // ── Delete ─────────────────────────────────────────────────────

    /// Tear down every record of a service. Returns the volume IDs the
    /// caller must reclaim; physical volumes are never deleted here.
    pub async fn delete_service(&self, cluster: &str, name: &str) -> ManageResult<Vec<String>> {
        let service_uuid = self.get_service_uuid(cluster, name)?;
        if let Some(tasks) = &self.init_tasks {
            tasks.cancel_init_task(&service_uuid);
        }

        let Some(attr) = self.state.get_service_attr(&service_uuid)? else {
            // An earlier delete got as far as removing the attr.
            for device in self.devices.service_devices(cluster, name)? {
                self.devices.delete_device(cluster, name, &device)?;
            }
            self.state.delete_service(cluster, name)?;
            info!(%cluster, service = %name, "service deleted");
            return Ok(Vec::new());
        };

        // Deleted means a previous run stopped just before removing the attr.
        let attr = if attr.meta.status == ServiceStatus::Deleted {
            info!(%cluster, service = %name, "resuming delete of deleted service");
            attr
        } else {
            self.update_status(attr, ServiceStatus::Deleting)?
        };
        let members = self.state.list_service_members(&service_uuid)?;

        for member in &members {
            self.delete_member_dns(&attr, member).await?;
            if let Some(ip) = &member.spec.static_ip {
                self.state.delete_static_ip(ip)?;
            }
            configfile::delete_config_files(&self.state, &service_uuid, &member.spec.configs)?;
            if !self.platform.kind().detaches_volumes() {
                self.detach_member_volumes(member).await?;
            }
        }

        for ip in self.state.list_static_ips_for_service(&service_uuid)? {
            self.state.delete_static_ip(&ip.ip)?;
            info!(ip = %ip.ip, "unassigned static ip released");
        }

        let mut volume_ids = Vec::new();
        for member in &members {
            let volumes = &member.spec.volumes;
            for (journal, present) in [(false, volumes.primary.is_some()), (true, volumes.journal.is_some())] {
                if !present {
                    continue;
                }
                if let Err(e) = self
                    .platform
                    .delete_service_volume(name, &member.member_name, journal)
                    .await
                {
                    warn!(member = %member.member_name, journal, error = %e, "failed to delete service volume");
                }
            }
            self.state.delete_service_member(&service_uuid, &member.member_name)?;
            volume_ids.extend(volumes.volume_ids().map(str::to_string));
            info!(member = %member.member_name, "service member deleted");
        }

        configfile::delete_config_files(&self.state, &service_uuid, &attr.spec.service_configs)?;

        if let Some(vols) = &attr.spec.volumes {
            self.devices.delete_device(cluster, name, &vols.primary.device_name)?;
            if let Some(journal) = &vols.journal {
                self.devices.delete_device(cluster, name, &journal.device_name)?;
            }
        }

        self.update_status(attr, ServiceStatus::Deleted)?;
        self.state.delete_service_attr(&service_uuid)?;
        self.state.delete_service(cluster, name)?;
        info!(%cluster, service = %name, volumes = volume_ids.len(), "service deleted");
        Ok(volume_ids)
    }

    async fn delete_member_dns(&self, attr: &ServiceAttr, member: &ServiceMember) -> ManageResult<()> {
        if !attr.spec.register_dns {
            return Ok(());
        }
        let dns_name = moorage_core::dns_name(&member.member_name, &attr.spec.domain);
        let zone = &attr.spec.hosted_zone_id;
        let host_ip = match self.dns.get_dns_record(&dns_name, zone).await {
            Ok(ip) => ip,
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        match self.dns.delete_dns_record(&dns_name, &host_ip, zone).await {
            Ok(()) => {
                info!(%dns_name, "dns record deleted");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn detach_member_volumes(&self, member: &ServiceMember) -> ManageResult<()> {
        let volumes = &member.spec.volumes;
        for vol in volumes.primary.iter().chain(volumes.journal.iter()) {
            let state = match self.server.get_volume_state(&vol.volume_id).await {
                Ok(state) => state,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e.into()),
            };
            if let Some(instance_id) = state.attached_instance() {
                self.server
                    .detach_volume(&vol.volume_id, instance_id, &vol.device_name)
                    .await?;
                info!(volume_id = %vol.volume_id, %instance_id, "volume detached");
            }
        }
        Ok(())
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn get_service_uuid(&self, cluster: &str, name: &str) -> ManageResult<String> {
        self.state
            .get_service(cluster, name)?
            .map(|s| s.service_uuid)
            .ok_or_else(|| ManageError::NotFound(format!("service {cluster}/{name}")))
    }

    pub fn get_service_attr(&self, cluster: &str, name: &str) -> ManageResult<ServiceAttr> {
        let service_uuid = self.get_service_uuid(cluster, name)?;
        self.require_attr(&service_uuid)
    }

    /// Clusters with at least one service record.
    pub fn list_clusters(&self) -> ManageResult<Vec<String>> {
        Ok(self.state.list_clusters()?)
    }

    /// Attributes of every service in the cluster that has them.
    pub fn list_services(&self, cluster: &str) -> ManageResult<Vec<ServiceAttr>> {
        let mut attrs = Vec::new();
        for svc in self.state.list_services(cluster)? {
            match self.state.get_service_attr(&svc.service_uuid)? {
                Some(attr) => attrs.push(attr),
                None => warn!(service = %svc.name, "service has no attr"),
            }
        }
        Ok(attrs)
    }

    pub fn list_service_members(&self, cluster: &str, name: &str) -> ManageResult<Vec<ServiceMember>> {
        let service_uuid = self.get_service_uuid(cluster, name)?;
        Ok(self.state.list_service_members(&service_uuid)?)
    }

    pub fn list_service_volumes(&self, cluster: &str, name: &str) -> ManageResult<ServiceVolumeIds> {
        let mut ids = ServiceVolumeIds::default();
        for member in self.list_service_members(cluster, name)? {
            if let Some(v) = member.spec.volumes.primary {
                ids.primary.push(v.volume_id);
            }
            if let Some(v) = member.spec.volumes.journal {
                ids.journal.push(v.volume_id);
            }
        }
        Ok(ids)
    }

    /// Rotate one config file of a member to new content.
    pub fn update_member_config(
        &self,
        cluster: &str,
        name: &str,
        member: &str,
        file_name: &str,
        content: &str,
    ) -> ManageResult<ConfigId> {
        let service_uuid = self.get_service_uuid(cluster, name)?;
        configfile::rotate_member_config(&self.state, &service_uuid, member, file_name, content)
    }

    /// Physically delete a volume returned by `delete_service`.
    pub async fn delete_volume(&self, volume_id: &str) -> ManageResult<()> {
        self.server.delete_volume(volume_id).await?;
        info!(%volume_id, "volume deleted");
        Ok(())
    }

    pub(crate) fn require_attr(&self, service_uuid: &str) -> ManageResult<ServiceAttr> {
        self.state
            .get_service_attr(service_uuid)?
            .ok_or_else(|| ManageError::NotFound(format!("service attr {service_uuid}")))
    }
}

fn is_valid_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_restricted_to_dns_labels() {
        assert!(is_valid_name("kafka-1"));
        assert!(!is_valid_name("a/b"));
        assert!(!is_valid_name("a:b"));
        assert!(!is_valid_name("a.b"));
    }
}
