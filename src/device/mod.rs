pub mod directory;
pub mod manager;
pub mod models;
pub mod version_reader;

pub use directory::{register_device, DeviceDirectory, InMemoryDirectory};
pub use manager::{DeviceEntry, DeviceManager, UpdateGuard};
pub use models::*;
pub use version_reader::DeviceVersionReader;


#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("Device not found")]
    NotFound,

    #[error("Device already configured: {0}")]
    AlreadyConfigured(String),

    #[error("Invalid MAC address length: {0}")]
    InvalidMacLength(String),

    #[error("Invalid characters in MAC address: {0}")]
    InvalidMacCharacters(String),

    #[error("Unknown firmware source: {0}")]
    UnknownSource(String),

    #[error("Invalid device configuration: {0}")]
    InvalidConfiguration(String),
}

pub type Result<T> = std::result::Result<T, DeviceError>;
