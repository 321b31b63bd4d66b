use std::collections::BTreeMap;
use std::sync::Arc;
use once_cell::sync::Lazy;
use regex::Regex;
use log::{debug, info, warn};

use crate::ble::{uuids, BleCentral, BleError, GattPeripheral};
use crate::config::VersionReaderSettings;
use crate::update::version::strip_version_prefix;
use super::MacAddress;

static VERSION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d+\.\d+(?:\.\d+)?(?:[-+][0-9A-Za-z.-]+)?$").expect("valid version regex")
});

/// Highest major/minor value accepted from advertisement data
const MAX_ADVERTISED_COMPONENT: u8 = 99;

/// Reads the firmware version a sensor is running
pub struct DeviceVersionReader {
    central: Arc<dyn BleCentral>,
    settings: VersionReaderSettings,
}

impl DeviceVersionReader {
    pub fn new(central: Arc<dyn BleCentral>, settings: VersionReaderSettings) -> Self {
        Self { central, settings }
    }

    /// Current firmware version of `address`, `None` when it cannot be determined.
    ///
    /// The software revision characteristic is authoritative. When it cannot be
    /// read, the last advertisement's manufacturer data is used instead.
    pub async fn current_version(&self, address: &MacAddress) -> Option<String> {
        let Some(mut peripheral) = self.central.resolve(address).await else {
            debug!("Device {} not available for version read", address);
            return None;
        };

        match tokio::time::timeout(
            self.settings.gatt_timeout(),
            read_software_revision(peripheral.as_mut()),
        )
        .await
        {
            Ok(Ok(raw)) => {
                if let Some(version) = parse_software_revision(&raw, self.settings.max_version_length) {
                    info!("Read firmware version {} from {} via GATT", version, address);
                    return Some(version);
                }
                debug!("Software revision of {} unusable, trying advertisement data", address);
            }
            Ok(Err(e)) if e.is_not_found() => {
                debug!("Software revision characteristic not available on {}: {}", address, e);
            }
            Ok(Err(e)) => {
                warn!("Failed to read version from {} via GATT: {}", address, e);
            }
            Err(_) => {
                warn!(
                    "Timed out reading version from {} after {:?}",
                    address,
                    self.settings.gatt_timeout()
                );
            }
        }

        if let Err(e) = peripheral.disconnect().await {
            debug!("Disconnect from {} failed: {}", address, e);
        }

        let advertisement = self.central.last_advertisement(address).await?;
        let version = parse_manufacturer_version(&advertisement.manufacturer_data, &self.settings);
        match &version {
            Some(version) => info!("Read firmware version {} from {} advertisement", version, address),
            None => debug!("No version in advertisement data of {}", address),
        }
        version
    }
}

async fn read_software_revision(peripheral: &mut dyn GattPeripheral) -> Result<Vec<u8>, BleError> {
    peripheral.connect().await?;
    let raw = peripheral.read(uuids::SOFTWARE_REVISION).await;
    if let Err(e) = peripheral.disconnect().await {
        debug!("Disconnect after version read failed: {}", e);
    }
    raw
}

/// Validate a raw software revision value and return it without its `v` prefix
pub fn parse_software_revision(raw: &[u8], max_len: usize) -> Option<String> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text.trim(),
        Err(e) => {
            warn!("Software revision is not valid UTF-8: {}", e);
            return None;
        }
    };

    if text.is_empty() {
        debug!("Empty software revision");
        return None;
    }
    if text.len() > max_len {
        warn!("Software revision too long ({} bytes), ignoring", text.len());
        return None;
    }

    let version = strip_version_prefix(text);
    if !VERSION_PATTERN.is_match(version) {
        warn!("Software revision '{}' is not a version string", text);
        return None;
    }
    Some(version.to_string())
}

/// Interpret fixed offsets of each manufacturer data blob as `major.minor`
pub fn parse_manufacturer_version(
    manufacturer_data: &BTreeMap<u16, Vec<u8>>,
    settings: &VersionReaderSettings,
) -> Option<String> {
    manufacturer_data.values().find_map(|blob| {
        if blob.len() < settings.min_manufacturer_data_len {
            return None;
        }
        let major = *blob.get(settings.version_byte_major)?;
        let minor = *blob.get(settings.version_byte_minor)?;
        (major <= MAX_ADVERTISED_COMPONENT && minor <= MAX_ADVERTISED_COMPONENT)
            .then(|| format!("{}.{}", major, minor))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_software_revision() {
        assert_eq!(parse_software_revision(b"V4.3", 32).as_deref(), Some("4.3"));
        assert_eq!(parse_software_revision(b"v3.2.1", 32).as_deref(), Some("3.2.1"));
        assert_eq!(parse_software_revision(b"2.0", 32).as_deref(), Some("2.0"));
        assert_eq!(parse_software_revision(b" 5.1 ", 32).as_deref(), Some("5.1"));
        assert_eq!(parse_software_revision(b"4.5-beta", 32).as_deref(), Some("4.5-beta"));
    }

    #[test]
    fn test_parse_software_revision_rejects_garbage() {
        assert!(parse_software_revision(b"", 32).is_none());
        assert!(parse_software_revision(b"   ", 32).is_none());
        assert!(parse_software_revision(&[0xff, 0xfe, 0x34], 32).is_none());
        assert!(parse_software_revision(b"firmware", 32).is_none());
        assert!(parse_software_revision(b"4", 32).is_none());
        assert!(parse_software_revision(b"vv4.3", 32).is_none());
        assert!(parse_software_revision(b"1.2.3.4.5.6.7.8.9.10.11.12.13.14.15", 32).is_none());
    }

    #[test]
    fn test_manufacturer_version_offsets() {
        let settings = VersionReaderSettings::default();
        let data = BTreeMap::from([(0x1234, vec![0, 1, 2, 3, 1, 2])]);
        assert_eq!(parse_manufacturer_version(&data, &settings).as_deref(), Some("1.2"));
    }

    #[test]
    fn test_manufacturer_version_skips_bad_blobs() {
        let settings = VersionReaderSettings::default();
        let data = BTreeMap::from([
            (0x0001, vec![0, 1, 2]),
            (0x0002, vec![0, 1, 2, 3, 150, 2]),
            (0x0003, vec![9, 9, 9, 9, 4, 7]),
        ]);
        assert_eq!(parse_manufacturer_version(&data, &settings).as_deref(), Some("4.7"));
        assert!(parse_manufacturer_version(&BTreeMap::new(), &settings).is_none());
    }

    #[test]
    fn test_manufacturer_version_custom_offsets() {
        let settings = VersionReaderSettings {
            min_manufacturer_data_len: 8,
            version_byte_major: 6,
            version_byte_minor: 7,
            ..VersionReaderSettings::default()
        };
        let data = BTreeMap::from([(1, vec![0, 0, 0, 0, 1, 2, 4, 5])]);
        assert_eq!(parse_manufacturer_version(&data, &settings).as_deref(), Some("4.5"));
    }
}
