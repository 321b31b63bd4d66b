use std::sync::Arc;
use serde_json::{json, Value};
use tokio::sync::watch;
use log::{error, info};

use super::{CoordinatorError, Result, UpdateCoordinator};
use crate::config::sources::source_display_name;
use crate::device::{DeviceInfo, DeviceManager};
use crate::update::UpdateService;

pub const PROGRESS_DOWNLOAD_START: u8 = 10;
pub const PROGRESS_DOWNLOAD_COMPLETE: u8 = 30;
/// Share of the bar covered by the flash itself
pub const PROGRESS_FLASH_RANGE: u8 = 60;
pub const PROGRESS_COMPLETE: u8 = 100;

/// Overall install percentage for a flash at `current` of `total` chunks
pub fn flash_progress_percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return PROGRESS_DOWNLOAD_COMPLETE;
    }
    let done = current.min(total) * PROGRESS_FLASH_RANGE as usize / total;
    PROGRESS_DOWNLOAD_COMPLETE + done as u8
}

fn source_attributes(source: &str) -> Value {
    json!({
        "firmware_source": source,
        "firmware_source_name": source_display_name(source),
    })
}

/// Firmware update entity for one sensor
pub struct FirmwareUpdateEntity {
    coordinator: Arc<UpdateCoordinator>,
    service: Arc<UpdateService>,
    manager: Arc<DeviceManager>,
    device_info: Option<DeviceInfo>,
    progress_tx: watch::Sender<Option<u8>>,
}

impl FirmwareUpdateEntity {
    pub fn new(
        coordinator: Arc<UpdateCoordinator>,
        service: Arc<UpdateService>,
        manager: Arc<DeviceManager>,
        device_info: Option<DeviceInfo>,
    ) -> Self {
        let (progress_tx, _) = watch::channel(None);
        Self {
            coordinator,
            service,
            manager,
            device_info,
            progress_tx,
        }
    }

    pub fn unique_id(&self) -> String {
        format!("{}_firmware_update", self.coordinator.mac())
    }

    pub fn name(&self) -> &'static str {
        "Firmware Update"
    }

    pub fn device_info(&self) -> Option<&DeviceInfo> {
        self.device_info.as_ref()
    }

    pub fn installed_version(&self) -> Option<String> {
        self.coordinator.snapshot()?.current_version.clone()
    }

    pub fn latest_version(&self) -> Option<String> {
        self.coordinator.snapshot().map(|s| s.latest_version.clone())
    }

    pub fn release_url(&self) -> Option<String> {
        self.coordinator.snapshot().map(|s| s.latest_release.release_url.clone())
    }

    pub fn release_summary(&self) -> Option<String> {
        self.coordinator.snapshot()?.latest_release.release_notes.clone()
    }

    pub fn update_available(&self) -> bool {
        self.coordinator
            .snapshot()
            .map(|s| s.update_available())
            .unwrap_or(false)
    }

    /// Install percentage, `None` when no install is running
    pub fn in_progress(&self) -> Option<u8> {
        *self.progress_tx.borrow()
    }

    pub fn subscribe_progress(&self) -> watch::Receiver<Option<u8>> {
        self.progress_tx.subscribe()
    }

    pub fn available(&self) -> bool {
        self.coordinator.state().available
    }

    pub fn extra_attributes(&self) -> Value {
        source_attributes(self.coordinator.firmware_source())
    }

    /// Install the latest known release
    pub async fn install(&self) -> Result<()> {
        let Some(snapshot) = self.coordinator.snapshot() else {
            return Err(CoordinatorError::NoReleaseAvailable);
        };
        let release = &snapshot.latest_release;
        let mac = *self.coordinator.mac();

        let _guard = self.manager.begin_update(&mac)?;
        info!("Starting firmware installation for {}: {}", mac, release.version);

        self.progress_tx.send_replace(Some(PROGRESS_DOWNLOAD_START));
        let on_progress = |current: usize, total: usize| {
            self.progress_tx.send_replace(Some(flash_progress_percent(current, total)));
        };

        let result = self.service.apply(&mac, release, Some(&on_progress)).await;

        if result.is_ok() {
            self.progress_tx.send_replace(Some(PROGRESS_COMPLETE));
        }
        self.progress_tx.send_replace(None);

        match result {
            Ok(()) => {
                self.coordinator.request_refresh().await;
                Ok(())
            }
            Err(e) => {
                error!("Error installing firmware on {}: {}", mac, e);
                Err(e.into())
            }
        }
    }
}

/// Reports the firmware version currently running on a sensor
pub struct FirmwareVersionSensor {
    coordinator: Arc<UpdateCoordinator>,
}

impl FirmwareVersionSensor {
    pub fn new(coordinator: Arc<UpdateCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn unique_id(&self) -> String {
        format!("{}_firmware_version", self.coordinator.mac())
    }

    pub fn name(&self) -> &'static str {
        "Firmware Version"
    }

    pub fn native_value(&self) -> Option<String> {
        self.coordinator
            .snapshot()?
            .current_version
            .clone()
            .filter(|v| !v.is_empty())
    }

    pub fn extra_attributes(&self) -> Value {
        source_attributes(self.coordinator.firmware_source())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flash_progress_mapping() {
        assert_eq!(flash_progress_percent(0, 5), 30);
        assert_eq!(flash_progress_percent(1, 2), 60);
        assert_eq!(flash_progress_percent(5, 5), 90);
        assert_eq!(flash_progress_percent(7, 5), 90);
        assert_eq!(flash_progress_percent(3, 0), 30);
    }

    #[test]
    fn test_source_attributes() {
        let attrs = source_attributes("pvvx");
        assert_eq!(attrs["firmware_source"], "pvvx");
        assert_eq!(attrs["firmware_source_name"], "pvvx (Most Active)");
        assert_eq!(source_attributes("other")["firmware_source_name"], "Unknown");
    }
}
