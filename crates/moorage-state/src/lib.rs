//! moorage-state: durable resource store for Moorage.
//!
//! Backed by [redb](https://docs.rs/redb), holds the records that describe
//! every provisioned service: the name→UUID mapping, service attributes,
//! per-replica members, block-device assignments, static IPs, and config
//! files.
//!
//! # Concurrency model
//!
//! Writes are conditional. `create_*` fails with [`StateError::Conflict`]
//! when the key already exists; `update_*` takes the value the caller last
//! read and fails with `Conflict` when the stored value has moved on (or
//! `NotFound` when it is gone). Callers recover by re-reading and deciding
//! again, never by overwriting.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
