use std::sync::Arc;
use log::{debug, info, warn, error};

use crate::ble::{uuids, BleCentral, BleError, GattPeripheral, Result as BleResult};
use crate::config::OtaSettings;
use crate::device::MacAddress;
use super::{chunk_count, OtaProgress};

/// Synchronous progress sink, called with `(chunks_sent, total_chunks)`
pub type ProgressFn<'a> = &'a (dyn Fn(usize, usize) + Send + Sync);

/// Drives the vendor OTA protocol over the control and data characteristics
pub struct OtaEngine {
    central: Arc<dyn BleCentral>,
    settings: OtaSettings,
}

impl OtaEngine {
    pub fn new(central: Arc<dyn BleCentral>, settings: OtaSettings) -> Self {
        Self { central, settings }
    }

    /// Flash `firmware` onto the device at `address`.
    ///
    /// The whole operation, connect through finalize, runs under one timeout.
    /// Any failure discards the session; a retry starts again from chunk zero.
    pub async fn flash(&self, address: &MacAddress, firmware: &[u8], on_progress: Option<ProgressFn<'_>>) -> bool {
        let Some(mut peripheral) = self.central.resolve(address).await else {
            error!("Could not find BLE device {} for firmware update", address);
            return false;
        };

        info!(
            "Starting OTA update of {} ({} bytes, {} chunks)",
            address,
            firmware.len(),
            chunk_count(firmware.len(), self.settings.chunk_size)
        );

        let outcome = tokio::time::timeout(
            self.settings.flash_timeout(),
            self.run_session(peripheral.as_mut(), firmware, on_progress),
        )
        .await;

        if let Err(e) = peripheral.disconnect().await {
            debug!("Disconnect after OTA of {} failed: {}", address, e);
        }

        match outcome {
            Ok(Ok(())) => {
                info!("Firmware flashed successfully to {}", address);
                true
            }
            Ok(Err(e)) => {
                error!("BLE error during firmware flash of {}: {}", address, e);
                false
            }
            Err(_) => {
                error!(
                    "Firmware flash of {} timed out after {:?}",
                    address,
                    self.settings.flash_timeout()
                );
                false
            }
        }
    }

    async fn run_session(
        &self,
        peripheral: &mut dyn GattPeripheral,
        firmware: &[u8],
        on_progress: Option<ProgressFn<'_>>,
    ) -> BleResult<()> {
        peripheral.connect().await?;
        if !peripheral.is_connected().await {
            return Err(BleError::NotConnected);
        }

        self.send_command(peripheral, self.settings.start_command, "start").await;

        let total = chunk_count(firmware.len(), self.settings.chunk_size);
        for (index, chunk) in firmware.chunks(self.settings.chunk_size).enumerate() {
            peripheral.write(uuids::OTA_DATA, chunk).await?;

            let progress = OtaProgress { current: index + 1, total };
            if let Some(callback) = on_progress {
                callback(progress.current, progress.total);
            }
            if progress.current % 100 == 0 {
                debug!("OTA progress: {}/{} chunks", progress.current, progress.total);
            }

            if !progress.is_complete() {
                tokio::time::sleep(self.settings.chunk_delay()).await;
            }
        }

        self.send_command(peripheral, self.settings.finalize_command, "finalize").await;
        Ok(())
    }

    /// Control commands are best-effort; some firmware builds never acknowledge them
    async fn send_command(&self, peripheral: &mut dyn GattPeripheral, command: u8, label: &str) {
        match peripheral.write(uuids::OTA_CONTROL, &[command]).await {
            Ok(()) => {
                debug!("OTA {} command 0x{:02X} sent", label, command);
                tokio::time::sleep(self.settings.command_delay()).await;
            }
            Err(e) => warn!("OTA {} command failed (continuing): {}", label, e),
        }
    }
}
