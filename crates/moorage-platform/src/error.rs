//! Error types shared by all collaborator adapters.

use thiserror::Error;

pub type PlatformResult<T> = Result<T, PlatformError>;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("not found: {0}")]
    NotFound(String),

    /// The platform already holds a volume for this member; carries its ID.
    #[error("volume already exists: {0}")]
    VolumeExists(String),

    #[error("address already in use: {0}")]
    AddressInUse(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("invalid device name: {0}")]
    InvalidDevice(String),

    #[error("request failed: {0}")]
    Request(String),
}

impl PlatformError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
