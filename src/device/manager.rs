use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::ble::Advertisement;
use crate::config::{find_source, DeviceSettings};
use crate::update::{UpdateError, UpdateResult};
use super::{DeviceError, DeviceInfo, MacAddress, Result};

/// A configured sensor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceEntry {
    pub entry_id: String,
    pub mac: MacAddress,
    pub firmware_source: String,
    /// Directory record the entry is attached to, once registered
    pub device_id: Option<String>,
    pub device_info: Option<DeviceInfo>,
}

/// Registry of configured devices and in-flight updates.
///
/// Created at application start and dropped at shutdown.
pub struct DeviceManager {
    entries: Arc<RwLock<HashMap<MacAddress, DeviceEntry>>>,
    command_registered: Arc<RwLock<bool>>,
    in_flight: Arc<StdMutex<HashSet<MacAddress>>>,
}

/// Marks an update as running for one address until dropped
#[derive(Debug)]
pub struct UpdateGuard {
    mac: MacAddress,
    in_flight: Arc<StdMutex<HashSet<MacAddress>>>,
}

impl Drop for UpdateGuard {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.remove(&self.mac);
    }
}

impl DeviceManager {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            command_registered: Arc::new(RwLock::new(false)),
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
        }
    }

    /// Add a configured device. The apply command is registered with the first entry.
    pub async fn add_entry(&self, settings: &DeviceSettings) -> Result<DeviceEntry> {
        let mac = MacAddress::parse(&settings.mac_address)?;
        if find_source(&settings.firmware_source).is_none() {
            return Err(DeviceError::UnknownSource(settings.firmware_source.clone()));
        }

        let mut entries = self.entries.write().await;
        if entries.contains_key(&mac) {
            return Err(DeviceError::AlreadyConfigured(mac.to_string()));
        }

        let entry = DeviceEntry {
            entry_id: Uuid::new_v4().to_string(),
            mac,
            firmware_source: settings.firmware_source.clone(),
            device_id: None,
            device_info: None,
        };
        entries.insert(mac, entry.clone());

        let mut registered = self.command_registered.write().await;
        if !*registered {
            log::debug!("Registering apply_firmware command");
            *registered = true;
        }

        log::info!("Configured device {} (source {})", mac, entry.firmware_source);
        Ok(entry)
    }

    /// Remove a configured device. The command goes away with the last entry.
    pub async fn remove_entry(&self, mac: &MacAddress) -> Option<DeviceEntry> {
        let mut entries = self.entries.write().await;
        let removed = entries.remove(mac);

        if entries.is_empty() {
            let mut registered = self.command_registered.write().await;
            if *registered {
                log::debug!("Unregistering apply_firmware command");
                *registered = false;
            }
        }
        removed
    }

    /// Record the directory record an entry was attached to
    pub async fn attach_record(&self, mac: &MacAddress, device_id: String, info: DeviceInfo) -> Result<()> {
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(mac).ok_or(DeviceError::NotFound)?;
        entry.device_id = Some(device_id);
        entry.device_info = Some(info);
        Ok(())
    }

    pub async fn get_entry(&self, mac: &MacAddress) -> Option<DeviceEntry> {
        self.entries.read().await.get(mac).cloned()
    }

    pub async fn get_entries(&self) -> Vec<DeviceEntry> {
        let mut entries: Vec<DeviceEntry> = self.entries.read().await.values().cloned().collect();
        entries.sort_by_key(|e| e.mac);
        entries
    }

    pub async fn is_command_registered(&self) -> bool {
        *self.command_registered.read().await
    }

    /// Claim the update slot for `mac`; a second concurrent claim is refused
    pub fn begin_update(&self, mac: &MacAddress) -> UpdateResult<UpdateGuard> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if !in_flight.insert(*mac) {
            log::warn!("Update already in progress for {}", mac);
            return Err(UpdateError::UpdateInProgress(mac.to_string()));
        }
        Ok(UpdateGuard {
            mac: *mac,
            in_flight: Arc::clone(&self.in_flight),
        })
    }

    pub fn is_updating(&self, mac: &MacAddress) -> bool {
        let in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        in_flight.contains(mac)
    }

    /// In-scope advertised devices that are not configured yet, one per address
    pub async fn discover(&self, advertisements: &[Advertisement]) -> Vec<Advertisement> {
        let entries = self.entries.read().await;
        let mut seen = HashSet::new();

        advertisements
            .iter()
            .filter(|adv| adv.is_atc_device())
            .filter(|adv| !entries.contains_key(&adv.address))
            .filter(|adv| seen.insert(adv.address))
            .cloned()
            .collect()
    }
}

impl Default for DeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(mac: &str, source: &str) -> DeviceSettings {
        DeviceSettings {
            mac_address: mac.to_string(),
            firmware_source: source.to_string(),
        }
    }

    fn advertisement(mac: &str, name: &str) -> Advertisement {
        let mut adv = Advertisement::new(MacAddress::parse(mac).unwrap());
        adv.name = Some(name.to_string());
        adv
    }

    #[tokio::test]
    async fn test_command_registration_follows_entries() {
        let manager = DeviceManager::new();
        assert!(!manager.is_command_registered().await);

        let first = manager.add_entry(&settings("a4:c1:38:00:00:01", "pvvx")).await.unwrap();
        manager.add_entry(&settings("a4c138000002", "atc1441")).await.unwrap();
        assert!(manager.is_command_registered().await);

        manager.remove_entry(&first.mac).await;
        assert!(manager.is_command_registered().await);

        let second = MacAddress::parse("A4:C1:38:00:00:02").unwrap();
        manager.remove_entry(&second).await;
        assert!(!manager.is_command_registered().await);
    }

    #[tokio::test]
    async fn test_add_entry_validation() {
        let manager = DeviceManager::new();
        assert!(matches!(
            manager.add_entry(&settings("A4:C1:38", "pvvx")).await,
            Err(DeviceError::InvalidMacLength(_))
        ));
        assert!(matches!(
            manager.add_entry(&settings("A4:C1:38:00:00:01", "nope")).await,
            Err(DeviceError::UnknownSource(_))
        ));
        manager.add_entry(&settings("A4:C1:38:00:00:01", "pvvx")).await.unwrap();
        assert!(matches!(
            manager.add_entry(&settings("a4-c1-38-00-00-01", "pvvx")).await,
            Err(DeviceError::AlreadyConfigured(_))
        ));
    }

    #[test]
    fn test_second_update_refused_until_guard_dropped() {
        let manager = DeviceManager::new();
        let mac = MacAddress::parse("A4:C1:38:00:00:01").unwrap();

        let guard = manager.begin_update(&mac).unwrap();
        assert!(manager.is_updating(&mac));
        assert!(matches!(manager.begin_update(&mac), Err(UpdateError::UpdateInProgress(_))));

        let other = MacAddress::parse("A4:C1:38:00:00:02").unwrap();
        assert!(manager.begin_update(&other).is_ok());

        drop(guard);
        assert!(!manager.is_updating(&mac));
        assert!(manager.begin_update(&mac).is_ok());
    }

    #[tokio::test]
    async fn test_discover_filters_and_dedupes() {
        let manager = DeviceManager::new();
        manager.add_entry(&settings("A4:C1:38:00:00:01", "pvvx")).await.unwrap();

        let seen = vec![
            advertisement("A4:C1:38:00:00:01", "ATC_000001"),
            advertisement("A4:C1:38:00:00:02", "ATC_000002"),
            advertisement("A4:C1:38:00:00:02", "ATC_000002"),
            advertisement("A4:C1:38:00:00:03", "Speaker"),
            advertisement("A4:C1:38:00:00:04", "LYWSD03MMC"),
        ];

        let found = manager.discover(&seen).await;
        let addresses: Vec<String> = found.iter().map(|a| a.address.to_string()).collect();
        assert_eq!(addresses, vec!["A4:C1:38:00:00:02", "A4:C1:38:00:00:04"]);
    }
}
