use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use serde::Serialize;

use crate::app::AppState;
use crate::ble::Advertisement;
use crate::config::find_source;
use crate::coordinator::{CoordinatorError, StateSnapshot};
use crate::device::MacAddress;
use crate::update::{versions_equal, UpdateError};

#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Device {0} not found")]
    DeviceNotFound(String),

    #[error("Device {0} has no Bluetooth address")]
    NoBluetoothAddress(String),

    #[error("No configuration found for {0}")]
    NoMatchingConfig(String),

    #[error("Invalid firmware source: {0}")]
    InvalidSource(String),

    #[error("Firmware version {0} not found")]
    VersionNotFound(String),

    #[error("Firmware update failed: {0}")]
    UpdateFailed(#[from] UpdateError),

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

pub type Result<T> = std::result::Result<T, CommandError>;

/// What `apply_firmware` did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ApplyOutcome {
    /// Device already runs the requested version; nothing was flashed
    AlreadyInstalled { version: String },
    Applied { version: String },
}

/// Tracks flash progress in 25 % steps
#[derive(Debug, Default)]
struct Milestones {
    last: AtomicU8,
}

impl Milestones {
    /// Newly reached milestone, if any
    fn advance(&self, current: usize, total: usize) -> Option<u8> {
        if total == 0 {
            return None;
        }
        let percent = (current.min(total) * 100 / total) as u8;
        let milestone = percent / 25 * 25;
        (milestone > 0 && milestone > self.last.fetch_max(milestone, Ordering::Relaxed)).then_some(milestone)
    }
}

/// Flash a specific firmware version onto a device
pub async fn apply_firmware(
    state: &AppState,
    device_id: &str,
    desired_version: &str,
) -> Result<ApplyOutcome> {
    let record = state
        .directory
        .get(device_id)
        .await
        .ok_or_else(|| CommandError::DeviceNotFound(device_id.to_string()))?;

    let mac = record
        .bluetooth_address()
        .ok_or_else(|| CommandError::NoBluetoothAddress(device_id.to_string()))?;

    let entry = state
        .manager
        .get_entry(&mac)
        .await
        .ok_or_else(|| CommandError::NoMatchingConfig(mac.to_string()))?;

    // Held from the version read through the flash
    let _guard = state.manager.begin_update(&mac)?;

    match state.reader.current_version(&mac).await {
        Some(current) if versions_equal(&current, desired_version) => {
            log::info!("Device {} already running firmware {}", mac, desired_version);
            return Ok(ApplyOutcome::AlreadyInstalled { version: current });
        }
        Some(current) => {
            log::info!("Updating {} from {} to {}", mac, current, desired_version);
        }
        None => {
            log::warn!(
                "Could not determine current firmware version of {}, proceeding with update to {}",
                mac,
                desired_version
            );
        }
    }

    if find_source(&entry.firmware_source).is_none() {
        return Err(CommandError::InvalidSource(entry.firmware_source));
    }

    let release = state
        .resolver
        .by_tag(&entry.firmware_source, desired_version)
        .await
        .ok_or_else(|| CommandError::VersionNotFound(desired_version.to_string()))?;

    let milestones = Milestones::default();
    let on_progress = |current: usize, total: usize| {
        if let Some(percent) = milestones.advance(current, total) {
            log::info!("Firmware flash progress for {}: {}%", mac, percent);
        }
    };
    state.service.apply(&mac, &release, Some(&on_progress)).await?;

    log::info!("Successfully applied firmware {} to {}", release.version, mac);
    Ok(ApplyOutcome::Applied { version: release.version })
}

/// Directory record id for a configured MAC address
pub async fn device_id_for(state: &AppState, mac: &MacAddress) -> Option<String> {
    state.manager.get_entry(mac).await.and_then(|e| e.device_id)
}

/// Poll a configured device once
pub async fn check_for_update(state: &AppState, mac: &MacAddress) -> Result<Arc<StateSnapshot>> {
    let coordinator = state
        .coordinator(mac)
        .await
        .ok_or_else(|| CommandError::NoMatchingConfig(mac.to_string()))?;
    Ok(coordinator.refresh().await?)
}

/// Install the latest release of the device's source
pub async fn install_update(state: &AppState, mac: &MacAddress) -> Result<()> {
    let entity = state
        .update_entity(mac)
        .await
        .ok_or_else(|| CommandError::NoMatchingConfig(mac.to_string()))?;

    if entity.latest_version().is_none() {
        check_for_update(state, mac).await?;
    }
    entity.install().await?;
    Ok(())
}

/// Version running on a device, as far as it can be determined
pub async fn current_version(state: &AppState, mac: &MacAddress) -> Option<String> {
    state.reader.current_version(mac).await
}

/// Nearby sensors that are not configured yet
pub async fn discover_devices(state: &AppState) -> Vec<Advertisement> {
    let advertisements = state.central.advertisements().await;
    state.manager.discover(&advertisements).await
}
