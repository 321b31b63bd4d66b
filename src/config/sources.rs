use serde::Serialize;

pub const FIRMWARE_SOURCE_PVVX: &str = "pvvx";
pub const FIRMWARE_SOURCE_ATC1441: &str = "atc1441";

/// A release feed that publishes firmware for the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FirmwareSource {
    pub key: &'static str,
    /// Display name
    pub name: &'static str,
    /// `owner/name` of the hosting repository
    pub repo: &'static str,
    /// Regex a release asset's filename must match
    pub asset_pattern: &'static str,
}

pub const FIRMWARE_SOURCES: &[FirmwareSource] = &[
    FirmwareSource {
        key: FIRMWARE_SOURCE_PVVX,
        name: "pvvx (Most Active)",
        repo: "pvvx/ATC_MiThermometer",
        asset_pattern: r"ATC_.*\.bin$",
    },
    FirmwareSource {
        key: FIRMWARE_SOURCE_ATC1441,
        name: "atc1441 (Original)",
        repo: "atc1441/ATC_MiThermometer",
        asset_pattern: r".*\.bin$",
    },
];

/// Look up a firmware source by key
pub fn find_source(key: &str) -> Option<&'static FirmwareSource> {
    FIRMWARE_SOURCES.iter().find(|s| s.key == key)
}

/// Display name for a source key, `Unknown` when not configured
pub fn source_display_name(key: &str) -> &'static str {
    find_source(key).map(|s| s.name).unwrap_or("Unknown")
}

/// Keys of every known firmware source
pub fn source_keys() -> Vec<&'static str> {
    FIRMWARE_SOURCES.iter().map(|s| s.key).collect()
}
