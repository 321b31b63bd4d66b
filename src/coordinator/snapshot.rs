use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::update::{versions_equal, FirmwareRelease};

/// Result of one poll. Never mutated; each refresh publishes a new one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    /// Version running on the device, `None` when it could not be read
    pub current_version: Option<String>,
    pub latest_version: String,
    pub latest_release: FirmwareRelease,
    pub firmware_source: String,
    pub fetched_at: DateTime<Utc>,
}

impl StateSnapshot {
    pub fn new(current_version: Option<String>, latest_release: FirmwareRelease, firmware_source: &str) -> Self {
        Self {
            current_version: current_version.filter(|v| !v.is_empty()),
            latest_version: latest_release.version.clone(),
            latest_release,
            firmware_source: firmware_source.to_string(),
            fetched_at: Utc::now(),
        }
    }

    /// Installed and latest differ. Unknown installed versions report no update.
    pub fn update_available(&self) -> bool {
        match &self.current_version {
            Some(current) => !versions_equal(current, &self.latest_version),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn release(version: &str) -> FirmwareRelease {
        FirmwareRelease {
            version: version.to_string(),
            download_url: "https://example.com/ATC.bin".into(),
            release_url: "https://example.com/release".into(),
            release_notes: None,
            published_at: None,
            checksum: None,
        }
    }

    #[test]
    fn test_update_available() {
        let snapshot = StateSnapshot::new(Some("4.3".into()), release("v4.5"), "pvvx");
        assert!(snapshot.update_available());

        let snapshot = StateSnapshot::new(Some("4.5".into()), release("v4.5"), "pvvx");
        assert!(!snapshot.update_available());

        let snapshot = StateSnapshot::new(None, release("v4.5"), "pvvx");
        assert!(!snapshot.update_available());
    }

    #[test]
    fn test_empty_current_version_is_unknown() {
        let snapshot = StateSnapshot::new(Some(String::new()), release("v4.5"), "pvvx");
        assert_eq!(snapshot.current_version, None);
    }
}
