//! Device name allocator.
//!
//! Every stateful service gets one block-device name per volume kind,
//! unique within the cluster, so that any host can mount any member's
//! volume at a known path. Names are handed out in increasing order and
//! claimed with a conditional create; a lost race is retried.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use moorage_platform::CloudServer;
use moorage_state::{Device, StateStore};

use crate::error::{ManageError, ManageResult};

/// Device order: shorter names first, then lexicographic.
/// `/dev/xvdz` < `/dev/xvdba`, unlike plain string order.
pub fn compare_device_names(a: &str, b: &str) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceAssignment {
    /// The service already owned this device (retry of an earlier create).
    Existing(String),
    /// A name nobody owns yet.
    Fresh(String),
}

impl DeviceAssignment {
    pub fn device_name(&self) -> &str {
        match self {
            Self::Existing(name) | Self::Fresh(name) => name,
        }
    }
}

pub struct DeviceAllocator {
    state: StateStore,
    server: Arc<dyn CloudServer>,
    max_retry_count: u32,
}

impl DeviceAllocator {
    pub fn new(state: StateStore, server: Arc<dyn CloudServer>, max_retry_count: u32) -> Self {
        Self {
            state,
            server,
            max_retry_count,
        }
    }

    /// Pick a device name for `service`.
    ///
    /// `exclude_device` is the service's own first device when allocating a
    /// second one (the journal). It still counts toward the highest name
    /// but is not returned as an existing assignment.
    pub fn assign_device_name(
        &self,
        cluster: &str,
        service: &str,
        exclude_device: Option<&str>,
    ) -> ManageResult<DeviceAssignment> {
        let mut devices = self.state.list_devices(cluster)?;
        devices.sort_by(|a, b| compare_device_names(&a.device_name, &b.device_name));

        let first = self.server.first_device_name();
        if devices.is_empty() {
            if exclude_device != Some(first.as_str()) {
                return Ok(DeviceAssignment::Fresh(first));
            }
            return Ok(DeviceAssignment::Fresh(self.server.next_device_name(&first)?));
        }

        let lowered = service.to_lowercase();
        let mut last = first;
        for dev in &devices {
            let is_excluded = exclude_device == Some(dev.device_name.as_str());
            if !is_excluded {
                if dev.service_name == service {
                    info!(%cluster, %service, device = %dev.device_name, "device already assigned to service");
                    return Ok(DeviceAssignment::Existing(dev.device_name.clone()));
                }
                if dev.service_name.to_lowercase() == lowered {
                    error!(%cluster, %service, existing = %dev.service_name, "service name differs only by case");
                    return Err(ManageError::ServiceExist(format!(
                        "{service} conflicts with existing service {}",
                        dev.service_name
                    )));
                }
            }
            if compare_device_names(&dev.device_name, &last) == Ordering::Greater {
                last = dev.device_name.clone();
            }
        }

        debug!(%cluster, %service, %last, count = devices.len(), "highest assigned device");
        Ok(DeviceAssignment::Fresh(self.server.next_device_name(&last)?))
    }

    /// Assign and durably claim a device name for `service`.
    pub fn create_device(
        &self,
        cluster: &str,
        service: &str,
        exclude_device: Option<&str>,
    ) -> ManageResult<String> {
        for attempt in 0..self.max_retry_count {
            let name = match self.assign_device_name(cluster, service, exclude_device)? {
                DeviceAssignment::Existing(name) => return Ok(name),
                DeviceAssignment::Fresh(name) => name,
            };

            let device = Device {
                cluster: cluster.to_string(),
                device_name: name.clone(),
                service_name: service.to_string(),
            };
            match self.state.create_device(&device) {
                Ok(()) => {
                    info!(%cluster, %service, device = %name, "device created");
                    return Ok(name);
                }
                Err(e) if e.is_conflict() => {
                    warn!(%cluster, %service, device = %name, attempt, "device taken concurrently, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        error!(%cluster, %service, retries = self.max_retry_count, "failed to create device");
        Err(ManageError::Internal(format!(
            "could not claim a device for {service} after {} attempts",
            self.max_retry_count
        )))
    }

    /// Release a device if `service` still owns it. Returns true if deleted.
    pub fn delete_device(&self, cluster: &str, service: &str, device_name: &str) -> ManageResult<bool> {
        match self.state.get_device(cluster, device_name)? {
            Some(dev) if dev.service_name == service => {
                let deleted = self.state.delete_device(cluster, device_name)?;
                info!(%cluster, %service, device = %device_name, "device deleted");
                Ok(deleted)
            }
            Some(dev) => {
                warn!(%cluster, %service, device = %device_name, owner = %dev.service_name, "device owned by another service");
                Ok(false)
            }
            None => Ok(false),
        }
    }

    /// Devices owned by `service`, in device order.
    pub fn service_devices(&self, cluster: &str, service: &str) -> ManageResult<Vec<String>> {
        let mut names: Vec<String> = self
            .state
            .list_devices(cluster)?
            .into_iter()
            .filter(|d| d.service_name == service)
            .map(|d| d.device_name)
            .collect();
        names.sort_by(|a, b| compare_device_names(a, b));
        Ok(names)
    }
}
