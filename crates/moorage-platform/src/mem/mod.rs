//! In-memory collaborator implementations.
//!
//! Used by the test suites and by `moorctl` when no cloud is configured.
//! Each keeps its state behind a `tokio::sync::Mutex` and exposes a few
//! inspection helpers so tests can assert on side effects.

mod container;
mod dns;
mod server;

pub use container::{MemContainerPlatform, RunTaskHook};
pub use dns::MemDns;
pub use server::{MemServer, interface};
