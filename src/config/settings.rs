use std::path::Path;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use super::{ConfigError, Result};

pub const GITHUB_API_BASE: &str = "https://api.github.com";

/// Release feed access settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseSettings {
    pub api_base: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    /// Retries after an HTTP 429 before giving up
    pub max_retries: u32,
    /// First backoff delay; doubles on each further attempt
    pub retry_base_delay_ms: u64,
}

impl ReleaseSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            api_base: GITHUB_API_BASE.to_string(),
            user_agent: concat!("atc-ota/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
            retry_base_delay_ms: 2000,
        }
    }
}

/// Firmware download settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadSettings {
    pub timeout_secs: u64,
    pub min_firmware_size: usize,
    pub max_firmware_size: usize,
}

impl DownloadSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            min_firmware_size: 1024,
            max_firmware_size: 512 * 1024,
        }
    }
}

/// BLE OTA transfer settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtaSettings {
    /// Bytes per data characteristic write
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
    /// Pause after each control command
    pub command_delay_ms: u64,
    /// Ceiling for the whole flash, connect through finalize
    pub flash_timeout_secs: u64,
    pub start_command: u8,
    pub finalize_command: u8,
}

impl OtaSettings {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }

    pub fn command_delay(&self) -> Duration {
        Duration::from_millis(self.command_delay_ms)
    }

    pub fn flash_timeout(&self) -> Duration {
        Duration::from_secs(self.flash_timeout_secs)
    }
}

impl Default for OtaSettings {
    fn default() -> Self {
        Self {
            chunk_size: 244,
            chunk_delay_ms: 20,
            command_delay_ms: 500,
            flash_timeout_secs: 300,
            start_command: 0x01,
            finalize_command: 0x02,
        }
    }
}

/// Settings for reading the running firmware version off a device
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionReaderSettings {
    pub gatt_timeout_secs: u64,
    pub max_version_length: usize,
    pub min_manufacturer_data_len: usize,
    /// Byte offsets of major/minor inside a manufacturer data blob. These vary
    /// between firmware builds.
    pub version_byte_major: usize,
    pub version_byte_minor: usize,
}

impl VersionReaderSettings {
    pub fn gatt_timeout(&self) -> Duration {
        Duration::from_secs(self.gatt_timeout_secs)
    }
}

impl Default for VersionReaderSettings {
    fn default() -> Self {
        Self {
            gatt_timeout_secs: 15,
            max_version_length: 32,
            min_manufacturer_data_len: 6,
            version_byte_major: 4,
            version_byte_minor: 5,
        }
    }
}

/// A sensor managed by this host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub mac_address: String,
    pub firmware_source: String,
}

/// Top-level application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub release: ReleaseSettings,
    pub download: DownloadSettings,
    pub ota: OtaSettings,
    pub version_reader: VersionReaderSettings,
    pub poll_interval_secs: u64,
    pub devices: Vec<DeviceSettings>,
}

impl Settings {
    /// Load settings from a JSON file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&raw)?;
        settings.validate()?;
        log::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ota.chunk_size == 0 {
            return Err(ConfigError::Invalid("ota.chunk_size must be greater than zero".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid("poll_interval_secs must be greater than zero".into()));
        }
        if self.download.min_firmware_size > self.download.max_firmware_size {
            return Err(ConfigError::Invalid(format!(
                "download.min_firmware_size ({}) exceeds download.max_firmware_size ({})",
                self.download.min_firmware_size, self.download.max_firmware_size
            )));
        }
        if self.version_reader.min_manufacturer_data_len
            <= self.version_reader.version_byte_major.max(self.version_reader.version_byte_minor)
        {
            return Err(ConfigError::Invalid(
                "version_reader.min_manufacturer_data_len must cover both version byte offsets".into(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            release: ReleaseSettings::default(),
            download: DownloadSettings::default(),
            ota: OtaSettings::default(),
            version_reader: VersionReaderSettings::default(),
            poll_interval_secs: 60 * 60,
            devices: Vec::new(),
        }
    }
}
