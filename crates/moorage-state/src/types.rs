//! Record types persisted in the resource store.

use serde::{Deserialize, Serialize};

use moorage_core::{Resources, ServiceType, VolumeSpec, epoch_secs};

/// Implemented by every persisted record: where it lives and under which key.
pub trait Record: Serialize + serde::de::DeserializeOwned + PartialEq {
    const TABLE: crate::tables::JsonTable;
    const KIND: &'static str;

    fn table_key(&self) -> String;
}

// ── Service ────────────────────────────────────────────────────

/// Name→UUID mapping, created exactly once per (cluster, name).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub cluster: String,
    pub name: String,
    pub service_uuid: String,
}

impl Service {
    pub fn key(cluster: &str, name: &str) -> String {
        format!("{cluster}/{name}")
    }
}

impl Record for Service {
    const TABLE: crate::tables::JsonTable = crate::tables::SERVICES;
    const KIND: &'static str = "service";

    fn table_key(&self) -> String {
        Self::key(&self.cluster, &self.name)
    }
}

// ── Service attributes ─────────────────────────────────────────

/// Lifecycle status of a service.
///
/// ```text
/// Creating ──► Initializing ──► Active
///    │              │             │
///    └──────────────┴─────────────┴──► Deleting ──► Deleted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Creating,
    Initializing,
    Active,
    Deleting,
    Deleted,
}

impl ServiceStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    /// Re-entering the same status is allowed so retries stay idempotent.
    pub fn can_transition_to(self, next: ServiceStatus) -> bool {
        use ServiceStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Creating, Initializing)
                | (Initializing, Active)
                | (Creating | Initializing | Active, Deleting)
                | (Deleting, Deleted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deleting | Self::Deleted)
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Creating => "CREATING",
            Self::Initializing => "INITIALIZING",
            Self::Active => "ACTIVE",
            Self::Deleting => "DELETING",
            Self::Deleted => "DELETED",
        };
        f.pad(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMeta {
    pub cluster: String,
    pub name: String,
    pub create_time: u64,
    pub last_modified: u64,
    pub service_type: ServiceType,
    pub status: ServiceStatus,
}

/// Device name plus the volume shape every member gets on that device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceVolume {
    pub device_name: String,
    pub spec: VolumeSpec,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceVolumes {
    pub primary: DeviceVolume,
    pub journal: Option<DeviceVolume>,
}

/// Reference to a stored config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigId {
    pub file_name: String,
    pub file_id: String,
    pub content_digest: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub replicas: u32,
    pub resources: Resources,
    pub register_dns: bool,
    pub domain: String,
    pub hosted_zone_id: String,
    pub require_static_ip: bool,
    pub service_configs: Vec<ConfigId>,
    pub catalog_service_type: String,
    pub volumes: Option<ServiceVolumes>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAttr {
    pub service_uuid: String,
    pub revision: u64,
    pub meta: ServiceMeta,
    pub spec: ServiceSpec,
}

impl ServiceAttr {
    /// Copy with a new status, bumped revision, and fresh mtime.
    pub fn with_status(&self, status: ServiceStatus) -> Self {
        let mut next = self.clone();
        next.revision += 1;
        next.meta.status = status;
        next.meta.last_modified = epoch_secs();
        next
    }

    /// Field-for-field equality ignoring revision, timestamps, and status.
    /// Two attrs that agree here describe the same create request.
    pub fn same_request(&self, other: &ServiceAttr) -> bool {
        self.service_uuid == other.service_uuid
            && self.meta.cluster == other.meta.cluster
            && self.meta.name == other.meta.name
            && self.meta.service_type == other.meta.service_type
            && self.spec == other.spec
    }

    pub fn is_stateful(&self) -> bool {
        self.meta.service_type == ServiceType::Stateful
    }
}

impl Record for ServiceAttr {
    const TABLE: crate::tables::JsonTable = crate::tables::SERVICE_ATTRS;
    const KIND: &'static str = "service attr";

    fn table_key(&self) -> String {
        self.service_uuid.clone()
    }
}

// ── Service members ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberVolume {
    pub volume_id: String,
    pub device_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberVolumes {
    pub primary: Option<MemberVolume>,
    pub journal: Option<MemberVolume>,
}

impl MemberVolumes {
    pub fn volume_ids(&self) -> impl Iterator<Item = &str> {
        self.primary
            .iter()
            .chain(self.journal.iter())
            .map(|v| v.volume_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberMeta {
    pub create_time: u64,
    pub last_modified: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSpec {
    pub availability_zone: String,
    pub static_ip: Option<String>,
    pub volumes: MemberVolumes,
    pub configs: Vec<ConfigId>,
    pub server_instance_id: Option<String>,
}

/// One replica of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMember {
    pub service_uuid: String,
    pub member_name: String,
    pub revision: u64,
    pub meta: MemberMeta,
    pub spec: MemberSpec,
}

impl ServiceMember {
    pub fn key(service_uuid: &str, member_name: &str) -> String {
        format!("{service_uuid}:{member_name}")
    }

    /// Copy with a replaced config list and bumped revision.
    pub fn with_configs(&self, configs: Vec<ConfigId>) -> Self {
        let mut next = self.clone();
        next.revision += 1;
        next.spec.configs = configs;
        next.meta.last_modified = epoch_secs();
        next
    }
}

impl Record for ServiceMember {
    const TABLE: crate::tables::JsonTable = crate::tables::SERVICE_MEMBERS;
    const KIND: &'static str = "service member";

    fn table_key(&self) -> String {
        Self::key(&self.service_uuid, &self.member_name)
    }
}

// ── Devices ────────────────────────────────────────────────────

/// One block-device name owned by one service in a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub cluster: String,
    pub device_name: String,
    pub service_name: String,
}

impl Device {
    pub fn key(cluster: &str, device_name: &str) -> String {
        format!("{cluster}:{device_name}")
    }
}

impl Record for Device {
    const TABLE: crate::tables::JsonTable = crate::tables::DEVICES;
    const KIND: &'static str = "device";

    fn table_key(&self) -> String {
        Self::key(&self.cluster, &self.device_name)
    }
}

// ── Static IPs ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIpSpec {
    pub service_uuid: String,
    pub availability_zone: String,
    pub server_instance_id: String,
    pub network_interface_id: String,
}

/// A private IP reserved for one service. Revision 0 means created but
/// not yet handed to a member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStaticIp {
    pub ip: String,
    pub revision: u64,
    pub spec: StaticIpSpec,
}

impl Record for ServiceStaticIp {
    const TABLE: crate::tables::JsonTable = crate::tables::STATIC_IPS;
    const KIND: &'static str = "static ip";

    fn table_key(&self) -> String {
        self.ip.clone()
    }
}

// ── Config files ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    pub service_uuid: String,
    pub file_id: String,
    pub revision: u64,
    pub file_name: String,
    pub file_mode: u32,
    pub content_digest: String,
    pub content: String,
    pub last_modified: u64,
}

impl ConfigFile {
    pub fn key(service_uuid: &str, file_id: &str) -> String {
        format!("{service_uuid}:{file_id}")
    }

    pub fn config_id(&self) -> ConfigId {
        ConfigId {
            file_name: self.file_name.clone(),
            file_id: self.file_id.clone(),
            content_digest: self.content_digest.clone(),
        }
    }
}

impl Record for ConfigFile {
    const TABLE: crate::tables::JsonTable = crate::tables::CONFIG_FILES;
    const KIND: &'static str = "config file";

    fn table_key(&self) -> String {
        Self::key(&self.service_uuid, &self.file_id)
    }
}
