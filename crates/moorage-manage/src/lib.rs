//! moorage-manage: the service orchestrator.
//!
//! ```text
//!   CreateServiceRequest
//!          │
//!          ▼
//!   ┌──────────────┐   devices    ┌─────────────────┐
//!   │ ManageService│─────────────▶│ DeviceAllocator │
//!   │              │   static ips ├─────────────────┤
//!   │  Creating    │─────────────▶│StaticIpAllocator│
//!   │  Initializing│   members    └─────────────────┘
//!   │  Active      │──────┐                │
//!   │  Deleting    │      ▼                ▼
//!   │  Deleted     │  volumes, DNS,   StateStore (redb)
//!   └──────┬───────┘  config files
//!          │ init task
//!          ▼
//!   InitTaskScheduler (moorage-tasks)
//! ```
//!
//! Every write goes through the state store's conditional primitives, so
//! concurrent or repeated calls converge on one set of records instead of
//! duplicating them.

pub mod config;
mod configfile;
pub mod device;
pub mod error;
mod member;
pub mod service;
pub mod staticip;

pub use config::ManageConfig;
pub use device::{DeviceAllocator, DeviceAssignment, compare_device_names};
pub use error::{ManageError, ManageResult};
pub use service::{ManageService, ServiceVolumeIds};
pub use staticip::{StaticIpAllocator, ZoneIpPools};
