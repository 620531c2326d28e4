//! moorage-core: shared request model, naming rules and configuration.

pub mod config;
pub mod naming;
pub mod types;

pub use config::{LogConfig, LogFormat, MoorageConfig, parse_duration};
pub use naming::*;
pub use types::*;
