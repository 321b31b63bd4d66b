use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use log::{info, warn, error};

use super::fetcher::FirmwareDownloader;
use super::integrity::{self, IntegrityOutcome};
use super::models::{FirmwareRelease, UpdateError, UpdateResult};
use crate::device::MacAddress;
use crate::ota::{OtaEngine, ProgressFn};

/// Runs one firmware update: download, verify, flash
pub struct UpdateService {
    downloader: Arc<dyn FirmwareDownloader>,
    engine: Arc<OtaEngine>,
}

impl UpdateService {
    pub fn new(downloader: Arc<dyn FirmwareDownloader>, engine: Arc<OtaEngine>) -> Self {
        Self { downloader, engine }
    }

    /// Install `release` on the device at `address`.
    ///
    /// Callers must not run two updates for the same address concurrently;
    /// see [`crate::device::DeviceManager::begin_update`].
    pub async fn apply(
        &self,
        address: &MacAddress,
        release: &FirmwareRelease,
        on_progress: Option<ProgressFn<'_>>,
    ) -> UpdateResult<()> {
        info!("Applying firmware {} to {}", release.version, address);

        let Some(firmware) = self.downloader.download(&release.download_url).await else {
            return Err(UpdateError::DownloadFailed);
        };

        let checksum_type = release.checksum_type().map(|kind| kind.as_str());
        match integrity::validate(&firmware, release.checksum_value(), checksum_type) {
            IntegrityOutcome::Verified => {}
            IntegrityOutcome::Unverified => {
                warn!(
                    "Flashing unverified firmware {} to {}: no checksum was published",
                    release.version, address
                );
            }
            IntegrityOutcome::Rejected(reason) => {
                error!("Refusing to flash firmware {}: {:?}", release.version, reason);
                return Err(UpdateError::IntegrityFailed);
            }
        }

        let forward = |current: usize, total: usize| {
            let Some(callback) = on_progress else {
                return;
            };
            if total == 0 {
                return;
            }
            if panic::catch_unwind(AssertUnwindSafe(|| callback(current, total))).is_err() {
                error!("Progress callback panicked at {}/{}; flash continues", current, total);
            }
        };

        if !self.engine.flash(address, &firmware, Some(&forward)).await {
            return Err(UpdateError::FlashFailed);
        }

        info!("Firmware {} applied to {}", release.version, address);
        Ok(())
    }
}
