//! redb table definitions for the Moorage resource store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).
//! Composite keys follow the pattern `{cluster}/{name}` or `{parent}:{child}`.

use redb::TableDefinition;

pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Service name→UUID mappings keyed by `{cluster}/{name}`.
pub const SERVICES: JsonTable = TableDefinition::new("services");

/// Service attributes keyed by `{service_uuid}`.
pub const SERVICE_ATTRS: JsonTable = TableDefinition::new("service_attrs");

/// Service members keyed by `{service_uuid}:{member_name}`.
pub const SERVICE_MEMBERS: JsonTable = TableDefinition::new("service_members");

/// Block-device assignments keyed by `{cluster}:{device_name}`.
pub const DEVICES: JsonTable = TableDefinition::new("devices");

/// Static IPs keyed by `{ip}`.
pub const STATIC_IPS: JsonTable = TableDefinition::new("static_ips");

/// Config files keyed by `{service_uuid}:{file_id}`.
pub const CONFIG_FILES: JsonTable = TableDefinition::new("config_files");

pub const ALL_TABLES: [JsonTable; 6] = [
    SERVICES,
    SERVICE_ATTRS,
    SERVICE_MEMBERS,
    DEVICES,
    STATIC_IPS,
    CONFIG_FILES,
];
