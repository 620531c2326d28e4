//! moorage-platform: interfaces to the systems Moorage drives.
//!
//! ```text
//!            ┌───────────────────┐
//!            │  moorage-manage   │
//!            └───┬─────┬─────┬───┘
//!                │     │     │
//!   ContainerPlatform  │   CloudServer
//!   (ECS/Swarm/K8s)    │   (volumes, ENIs, device names)
//!                  DnsProvider
//! ```
//!
//! Every interface is an `async_trait` object-safe trait so adapters can be
//! swapped behind `Arc<dyn ...>`. The [`mem`] module provides process-local
//! implementations.

pub mod container;
pub mod device;
pub mod dns;
pub mod error;
pub mod mem;
pub mod server;

pub use container::*;
pub use dns::DnsProvider;
pub use error::{PlatformError, PlatformResult};
pub use server::*;
