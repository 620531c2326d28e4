//! Cloud server and network provider interface.

use async_trait::async_trait;

use moorage_core::VolumeSpec;

use crate::error::PlatformResult;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateVolumeOptions {
    pub availability_zone: String,
    pub spec: VolumeSpec,
    pub tags: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VolumeState {
    Creating,
    Available,
    Attaching { instance_id: String },
    InUse { instance_id: String },
    Detaching,
    Deleting,
    Deleted,
    Error,
}

impl VolumeState {
    /// Instance the volume is (being) attached to.
    pub fn attached_instance(&self) -> Option<&str> {
        match self {
            Self::Attaching { instance_id } | Self::InUse { instance_id } => Some(instance_id),
            _ => None,
        }
    }
}

/// A network interface and the private IPs bound to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInterface {
    pub interface_id: String,
    pub server_instance_id: String,
    pub primary_private_ip: String,
    /// Secondary private IPs (the primary is not repeated here).
    pub private_ips: Vec<String>,
}

/// The interfaces of one zone plus the subnet they live in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneNetwork {
    pub interfaces: Vec<NetworkInterface>,
    pub cidr_block: String,
}

#[async_trait]
pub trait CloudServer: Send + Sync {
    /// Start creating a volume and return its ID.
    async fn create_volume(&self, opts: &CreateVolumeOptions) -> PlatformResult<String>;

    /// Block until the volume leaves the creating state (bounded by the adapter).
    async fn wait_volume_created(&self, volume_id: &str) -> PlatformResult<()>;

    async fn get_volume_state(&self, volume_id: &str) -> PlatformResult<VolumeState>;

    async fn detach_volume(
        &self,
        volume_id: &str,
        instance_id: &str,
        device_name: &str,
    ) -> PlatformResult<()>;

    async fn delete_volume(&self, volume_id: &str) -> PlatformResult<()>;

    async fn get_network_interfaces(
        &self,
        cluster: &str,
        vpc_id: &str,
        zone: &str,
    ) -> PlatformResult<ZoneNetwork>;

    /// Bind a secondary private IP to an interface. Fails if someone else
    /// already holds the address.
    async fn assign_static_ip(&self, interface_id: &str, ip: &str) -> PlatformResult<()>;

    fn first_device_name(&self) -> String;

    fn next_device_name(&self, last: &str) -> PlatformResult<String>;
}
