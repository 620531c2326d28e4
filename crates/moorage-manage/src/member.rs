//! Service member manager.
//!
//! Members are created in index order and each one is written once, with
//! its volumes, configs and static IP already in place. A member that a
//! previous attempt managed to write is left untouched.

use std::collections::HashSet;

use tracing::{info, warn};

use moorage_core::{CreateServiceRequest, ReplicaConfig, epoch_secs, member_name};
use moorage_platform::{CreateVolumeOptions, PlatformError, ServiceVolumeRequest};
use moorage_state::*;

use crate::configfile;
use crate::error::{ManageError, ManageResult};
use crate::service::ManageService;
use crate::staticip::ZoneIpPools;

impl ManageService {
    /// Create every member the service is missing and return the full set.
    pub(crate) async fn check_and_create_service_members(
        &self,
        attr: &ServiceAttr,
        req: &CreateServiceRequest,
    ) -> ManageResult<Vec<ServiceMember>> {
        let service_uuid = attr.service_uuid.as_str();
        let mut members = self.state.list_service_members(service_uuid)?;
        if !attr.is_stateful() && req.replica_configs.is_empty() {
            info!(%service_uuid, "stateless service without replica configs, no members");
            return Ok(members);
        }

        let mut pools = if attr.spec.require_static_ip {
            self.static_ips
                .create_static_ips(attr, &req.replica_configs, &members)
                .await?
        } else {
            ZoneIpPools::new()
        };

        let existing: HashSet<String> = members.iter().map(|m| m.member_name.clone()).collect();
        for (idx, replica) in req.replica_configs.iter().enumerate() {
            let name = member_name(&attr.meta.name, idx as u32);
            if existing.contains(&name) {
                continue;
            }
            let member = self.create_member(attr, &name, replica, &mut pools).await?;
            members.push(member);
        }

        if attr.is_stateful() {
            for member in &members {
                for id in member.spec.volumes.volume_ids() {
                    self.server.wait_volume_created(id).await?;
                }
            }
        }
        Ok(members)
    }

    async fn create_member(
        &self,
        attr: &ServiceAttr,
        name: &str,
        replica: &ReplicaConfig,
        pools: &mut ZoneIpPools,
    ) -> ManageResult<ServiceMember> {
        let zone = replica.zone.as_str();
        let static_ip = if attr.spec.require_static_ip {
            let ip = pools
                .get_mut(zone)
                .and_then(|pool| pool.pop_front())
                .ok_or_else(|| ManageError::Internal(format!("no static ip left for {name} in {zone}")))?;
            Some(ip)
        } else {
            None
        };

        if attr.spec.register_dns {
            let host_ip = static_ip
                .as_ref()
                .map(|ip| ip.ip.clone())
                .unwrap_or_else(|| self.config.default_host_ip.clone());
            let dns_name = moorage_core::dns_name(name, &attr.spec.domain);
            if let Err(e) = self
                .dns
                .update_dns_record(&dns_name, &host_ip, &attr.spec.hosted_zone_id)
                .await
            {
                warn!(%dns_name, error = %e, "failed to pre-create dns record");
            }
        }

        let configs =
            configfile::create_config_files(&self.state, &attr.service_uuid, name, &replica.configs)?;
        let volumes = match &attr.spec.volumes {
            Some(vols) => self.create_member_volumes(attr, name, zone, vols).await?,
            None => MemberVolumes::default(),
        };

        let now = epoch_secs();
        let member = ServiceMember {
            service_uuid: attr.service_uuid.clone(),
            member_name: name.to_string(),
            revision: 0,
            meta: MemberMeta {
                create_time: now,
                last_modified: now,
            },
            spec: MemberSpec {
                availability_zone: zone.to_string(),
                server_instance_id: static_ip.as_ref().map(|ip| ip.spec.server_instance_id.clone()),
                static_ip: static_ip.map(|ip| ip.ip),
                volumes,
                configs,
            },
        };

        match self.state.create_service_member(&member) {
            Ok(()) => {
                info!(member = %name, %zone, "service member created");
                Ok(member)
            }
            Err(e) if e.is_conflict() => {
                let stored = self
                    .state
                    .get_service_member(&attr.service_uuid, name)?
                    .ok_or_else(|| ManageError::Internal(format!("member {name} vanished after conflict")))?;
                let kept: HashSet<&str> = stored.spec.volumes.volume_ids().collect();
                for id in member.spec.volumes.volume_ids() {
                    if !kept.contains(id) {
                        self.discard_volume(id).await;
                    }
                }
                info!(member = %name, "service member already exists");
                Ok(stored)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_member_volumes(
        &self,
        attr: &ServiceAttr,
        member: &str,
        zone: &str,
        vols: &ServiceVolumes,
    ) -> ManageResult<MemberVolumes> {
        let primary = self
            .create_member_volume(attr, member, zone, &vols.primary, false)
            .await?;
        let journal = match &vols.journal {
            Some(journal) => Some(self.create_member_volume(attr, member, zone, journal, true).await?),
            None => None,
        };
        Ok(MemberVolumes {
            primary: Some(primary),
            journal,
        })
    }

    /// Create a volume and register it with the platform. When the platform
    /// already tracks a volume for this member slot, that one wins and the
    /// fresh volume is discarded.
    async fn create_member_volume(
        &self,
        attr: &ServiceAttr,
        member: &str,
        zone: &str,
        device: &DeviceVolume,
        journal: bool,
    ) -> ManageResult<MemberVolume> {
        let volume_id = self
            .server
            .create_volume(&CreateVolumeOptions {
                availability_zone: zone.to_string(),
                spec: device.spec.clone(),
                tags: volume_tags(attr, member, journal),
            })
            .await?;
        info!(%member, %volume_id, journal, "volume created");

        let req = ServiceVolumeRequest {
            service_name: attr.meta.name.clone(),
            member_name: member.to_string(),
            volume_id: volume_id.clone(),
            size_gb: device.spec.size_gb,
            journal,
        };
        let volume_id = match self.platform.create_service_volume(&req).await {
            Ok(()) => volume_id,
            Err(PlatformError::VolumeExists(existing)) => {
                info!(%member, %existing, journal, "platform already holds a volume for member");
                if existing != volume_id {
                    self.discard_volume(&volume_id).await;
                }
                existing
            }
            Err(e) => {
                self.discard_volume(&volume_id).await;
                return Err(e.into());
            }
        };
        Ok(MemberVolume {
            volume_id,
            device_name: device.device_name.clone(),
        })
    }

    async fn discard_volume(&self, volume_id: &str) {
        match self.server.delete_volume(volume_id).await {
            Ok(()) => info!(%volume_id, "unused volume deleted"),
            Err(e) => warn!(%volume_id, error = %e, "failed to delete unused volume"),
        }
    }
}

fn volume_tags(attr: &ServiceAttr, member: &str, journal: bool) -> Vec<(String, String)> {
    let kind = if journal { "journal" } else { "data" };
    vec![
        ("Cluster".to_string(), attr.meta.cluster.clone()),
        ("Service".to_string(), attr.meta.name.clone()),
        ("ServiceUUID".to_string(), attr.service_uuid.clone()),
        ("Member".to_string(), member.to_string()),
        ("VolumeKind".to_string(), kind.to_string()),
    ]
}
