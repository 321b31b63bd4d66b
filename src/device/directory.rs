use std::collections::{BTreeSet, HashMap};
use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;
use log::{debug, info, warn};

use super::{DeviceError, DeviceInfo, DeviceRecord, MacAddress, Result, CONNECTION_BLUETOOTH};

/// Host-side store of device records, shared with other integrations
#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    /// Record already known for the Bluetooth address, if any
    async fn resolve(&self, mac: &MacAddress) -> Option<DeviceRecord>;

    async fn get(&self, device_id: &str) -> Option<DeviceRecord>;

    /// Attach `owner` to an existing record
    async fn link(&self, device_id: &str, owner: &str) -> Result<()>;

    /// Insert a new record described by `info`, owned by `owner`
    async fn create(&self, info: &DeviceInfo, owner: &str) -> Result<DeviceRecord>;
}

/// Directory held in memory for the lifetime of the process
#[derive(Default)]
pub struct InMemoryDirectory {
    records: RwLock<HashMap<String, DeviceRecord>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record as created by another integration
    pub async fn insert(&self, record: DeviceRecord) {
        self.records.write().await.insert(record.id.clone(), record);
    }

    pub async fn records(&self) -> Vec<DeviceRecord> {
        self.records.read().await.values().cloned().collect()
    }
}

#[async_trait]
impl DeviceDirectory for InMemoryDirectory {
    async fn resolve(&self, mac: &MacAddress) -> Option<DeviceRecord> {
        let wanted = (CONNECTION_BLUETOOTH.to_string(), mac.to_string());
        let records = self.records.read().await;
        records
            .values()
            .find(|r| r.connections.contains(&wanted))
            .cloned()
    }

    async fn get(&self, device_id: &str) -> Option<DeviceRecord> {
        self.records.read().await.get(device_id).cloned()
    }

    async fn link(&self, device_id: &str, owner: &str) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records.get_mut(device_id).ok_or(DeviceError::NotFound)?;
        record.owners.insert(owner.to_string());
        Ok(())
    }

    async fn create(&self, info: &DeviceInfo, owner: &str) -> Result<DeviceRecord> {
        let record = DeviceRecord {
            id: Uuid::new_v4().to_string(),
            name: info.name.clone(),
            identifiers: info.identifiers.clone(),
            connections: info.connections.clone(),
            owners: BTreeSet::from([owner.to_string()]),
        };
        self.records.write().await.insert(record.id.clone(), record.clone());
        Ok(record)
    }
}

/// Register `mac` in the directory for `owner`.
///
/// Joins the sibling record when one exists; if linking fails the device is
/// registered as a standalone record instead.
pub async fn register_device(
    directory: &dyn DeviceDirectory,
    mac: &MacAddress,
    owner: &str,
) -> Result<(DeviceRecord, DeviceInfo)> {
    if let Some(sibling) = directory.resolve(mac).await {
        match directory.link(&sibling.id, owner).await {
            Ok(()) => {
                info!("Linked {} to existing device record {}", mac, sibling.id);
                let info = DeviceInfo::build(mac, Some(&sibling));
                let record = directory.get(&sibling.id).await.unwrap_or(sibling);
                return Ok((record, info));
            }
            Err(e) => {
                warn!(
                    "Could not link {} to device record {} ({}), registering standalone",
                    mac, sibling.id, e
                );
            }
        }
    } else {
        debug!("No existing device record for {}", mac);
    }

    let info = DeviceInfo::build(mac, None);
    let record = directory.create(&info, owner).await?;
    info!("Registered standalone device record {} for {}", record.id, mac);
    Ok((record, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{BTHOME_DOMAIN, DOMAIN};

    fn mac() -> MacAddress {
        MacAddress::parse("A4:C1:38:12:34:56").unwrap()
    }

    fn bthome_record() -> DeviceRecord {
        DeviceRecord {
            id: "bthome-1".into(),
            name: Some("ATC_123456".into()),
            identifiers: BTreeSet::from([(BTHOME_DOMAIN.into(), mac().to_string())]),
            connections: BTreeSet::from([(CONNECTION_BLUETOOTH.into(), mac().to_string())]),
            owners: BTreeSet::from(["bthome_entry".into()]),
        }
    }

    #[tokio::test]
    async fn test_register_links_to_sibling() {
        let directory = InMemoryDirectory::new();
        directory.insert(bthome_record()).await;

        let (record, info) = register_device(&directory, &mac(), "entry-1").await.unwrap();

        assert_eq!(record.id, "bthome-1");
        assert!(record.owners.contains("entry-1"));
        assert!(record.owners.contains("bthome_entry"));
        assert!(info.identifiers.contains(&(DOMAIN.into(), mac().to_string())));
        assert!(!info.is_standalone());
        assert_eq!(directory.records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_register_standalone_without_sibling() {
        let directory = InMemoryDirectory::new();

        let (record, info) = register_device(&directory, &mac(), "entry-1").await.unwrap();

        assert!(info.is_standalone());
        assert_eq!(record.name.as_deref(), Some("ATC MiThermometer 34:56"));
        assert_eq!(directory.resolve(&mac()).await.map(|r| r.id), Some(record.id));
    }

    struct BrokenLinkDirectory(InMemoryDirectory);

    #[async_trait]
    impl DeviceDirectory for BrokenLinkDirectory {
        async fn resolve(&self, mac: &MacAddress) -> Option<DeviceRecord> {
            self.0.resolve(mac).await
        }
        async fn get(&self, device_id: &str) -> Option<DeviceRecord> {
            self.0.get(device_id).await
        }
        async fn link(&self, _device_id: &str, _owner: &str) -> Result<()> {
            Err(DeviceError::InvalidConfiguration("directory is read-only".into()))
        }
        async fn create(&self, info: &DeviceInfo, owner: &str) -> Result<DeviceRecord> {
            self.0.create(info, owner).await
        }
    }

    #[tokio::test]
    async fn test_link_failure_degrades_to_standalone() {
        let inner = InMemoryDirectory::new();
        inner.insert(bthome_record()).await;
        let directory = BrokenLinkDirectory(inner);

        let (record, info) = register_device(&directory, &mac(), "entry-1").await.unwrap();

        assert!(info.is_standalone());
        assert_ne!(record.id, "bthome-1");
    }
}
