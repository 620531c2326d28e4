use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::device::{first_xvd_device, next_xvd_device};
use crate::error::{PlatformError, PlatformResult};
use crate::server::*;

#[derive(Default)]
struct Inner {
    zones: HashMap<String, ZoneNetwork>,
    volumes: HashMap<String, VolumeState>,
    /// Addresses some other party grabs before we can bind them.
    taken_elsewhere: HashSet<String>,
    /// Every successful `assign_static_ip`, as (zone, ip).
    assigned: Vec<(String, String)>,
    deleted_volumes: Vec<String>,
}

/// Process-local cloud server with per-zone interfaces and volumes.
#[derive(Default)]
pub struct MemServer {
    inner: Mutex<Inner>,
}

impl MemServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a zone with its subnet and interfaces.
    pub async fn add_zone(&self, zone: &str, cidr_block: &str, interfaces: Vec<NetworkInterface>) {
        let mut inner = self.inner.lock().await;
        inner.zones.insert(
            zone.to_string(),
            ZoneNetwork {
                interfaces,
                cidr_block: cidr_block.to_string(),
            },
        );
    }

    /// Make `assign_static_ip` fail for `ip` as if another host bound it first.
    pub async fn take_ip_elsewhere(&self, ip: &str) {
        self.inner.lock().await.taken_elsewhere.insert(ip.to_string());
    }

    pub async fn assigned_ips(&self) -> Vec<(String, String)> {
        self.inner.lock().await.assigned.clone()
    }

    pub async fn attach_volume(&self, volume_id: &str, instance_id: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| PlatformError::NotFound(volume_id.to_string()))?;
        *state = VolumeState::InUse {
            instance_id: instance_id.to_string(),
        };
        Ok(())
    }

    pub async fn volume_count(&self) -> usize {
        self.inner.lock().await.volumes.len()
    }

    pub async fn deleted_volumes(&self) -> Vec<String> {
        self.inner.lock().await.deleted_volumes.clone()
    }
}

/// Build a single-interface zone description for tests and local runs.
pub fn interface(id: &str, instance: &str, primary: &str, secondary: &[&str]) -> NetworkInterface {
    NetworkInterface {
        interface_id: id.to_string(),
        server_instance_id: instance.to_string(),
        primary_private_ip: primary.to_string(),
        private_ips: secondary.iter().map(|ip| ip.to_string()).collect(),
    }
}

#[async_trait]
impl CloudServer for MemServer {
    async fn create_volume(&self, _opts: &CreateVolumeOptions) -> PlatformResult<String> {
        let mut inner = self.inner.lock().await;
        let id = format!("vol-{}", uuid::Uuid::new_v4().simple());
        inner.volumes.insert(id.clone(), VolumeState::Creating);
        Ok(id)
    }

    async fn wait_volume_created(&self, volume_id: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| PlatformError::NotFound(volume_id.to_string()))?;
        if *state == VolumeState::Creating {
            *state = VolumeState::Available;
        }
        Ok(())
    }

    async fn get_volume_state(&self, volume_id: &str) -> PlatformResult<VolumeState> {
        let inner = self.inner.lock().await;
        inner
            .volumes
            .get(volume_id)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(volume_id.to_string()))
    }

    async fn detach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        _device_name: &str,
    ) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        let state = inner
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| PlatformError::NotFound(volume_id.to_string()))?;
        if state.attached_instance() != Some(instance_id) {
            return Err(PlatformError::Request(format!(
                "{volume_id} is not attached to {instance_id}"
            )));
        }
        *state = VolumeState::Available;
        Ok(())
    }

    async fn delete_volume(&self, volume_id: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .volumes
            .remove(volume_id)
            .ok_or_else(|| PlatformError::NotFound(volume_id.to_string()))?;
        inner.deleted_volumes.push(volume_id.to_string());
        Ok(())
    }

    async fn get_network_interfaces(
        &self,
        _cluster: &str,
        _vpc_id: &str,
        zone: &str,
    ) -> PlatformResult<ZoneNetwork> {
        let inner = self.inner.lock().await;
        inner
            .zones
            .get(zone)
            .cloned()
            .ok_or_else(|| PlatformError::NotFound(format!("zone {zone}")))
    }

    async fn assign_static_ip(&self, interface_id: &str, ip: &str) -> PlatformResult<()> {
        let mut inner = self.inner.lock().await;
        let in_use = inner.taken_elsewhere.contains(ip)
            || inner.zones.values().flat_map(|z| &z.interfaces).any(|nic| {
                nic.primary_private_ip == ip || nic.private_ips.iter().any(|p| p == ip)
            });
        if in_use {
            return Err(PlatformError::AddressInUse(ip.to_string()));
        }

        let (zone, nic) = inner
            .zones
            .iter_mut()
            .find_map(|(zone, net)| {
                net.interfaces
                    .iter_mut()
                    .find(|nic| nic.interface_id == interface_id)
                    .map(|nic| (zone.clone(), nic))
            })
            .ok_or_else(|| PlatformError::NotFound(interface_id.to_string()))?;
        nic.private_ips.push(ip.to_string());
        inner.assigned.push((zone, ip.to_string()));
        Ok(())
    }

    fn first_device_name(&self) -> String {
        first_xvd_device()
    }

    fn next_device_name(&self, last: &str) -> PlatformResult<String> {
        next_xvd_device(last)
    }
}
