use std::fmt;
use serde::{Deserialize, Serialize};

/// Digest algorithms accepted for firmware verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumType {
    Sha256,
    Sha512,
}

impl ChecksumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha512 => "sha512",
        }
    }
}

impl fmt::Display for ChecksumType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Checksum published alongside a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseChecksum {
    pub value: String,
    pub kind: ChecksumType,
}

/// Firmware release metadata as published on the release feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareRelease {
    /// Tag as published, e.g. `v4.5`
    pub version: String,
    pub download_url: String,
    pub release_url: String,
    pub release_notes: Option<String>,
    pub published_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Checksum and its algorithm are present together or not at all
    pub checksum: Option<ReleaseChecksum>,
}

impl FirmwareRelease {
    pub fn checksum_value(&self) -> Option<&str> {
        self.checksum.as_ref().map(|c| c.value.as_str())
    }

    pub fn checksum_type(&self) -> Option<ChecksumType> {
        self.checksum.as_ref().map(|c| c.kind)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("Failed to download firmware")]
    DownloadFailed,

    #[error("Firmware checksum validation failed. Downloaded file may be corrupted or tampered with.")]
    IntegrityFailed,

    #[error("Firmware flash failed")]
    FlashFailed,

    #[error("Update already in progress for device: {0}")]
    UpdateInProgress(String),
}

pub type UpdateResult<T> = Result<T, UpdateError>;
