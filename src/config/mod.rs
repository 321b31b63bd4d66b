pub mod settings;
pub mod sources;

pub use settings::{
    DeviceSettings, DownloadSettings, OtaSettings, ReleaseSettings, Settings,
    VersionReaderSettings,
};
pub use sources::{find_source, source_keys, FirmwareSource, FIRMWARE_SOURCES};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
