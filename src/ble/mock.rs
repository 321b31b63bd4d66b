//! In-memory Bluetooth central for tests and dry runs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{uuids, Advertisement, BleCentral, BleError, GattPeripheral, Result};
use crate::device::MacAddress;

/// Failure a mock device injects instead of succeeding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    NotFound,
    Timeout,
    Transport,
}

impl MockFailure {
    fn to_error(self, characteristic: Option<Uuid>) -> BleError {
        match self {
            MockFailure::NotFound => match characteristic {
                Some(uuid) => BleError::CharacteristicNotFound(uuid),
                None => BleError::DeviceNotFound("mock".to_string()),
            },
            MockFailure::Timeout => BleError::Timeout,
            MockFailure::Transport => BleError::Transport("injected failure".to_string()),
        }
    }
}

/// Behaviour of one simulated sensor
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub advertisement: Option<Advertisement>,
    /// Whether `resolve` hands out a handle at all
    pub connectable: bool,
    pub connect_failure: Option<MockFailure>,
    /// Delay before `connect` returns
    pub connect_delay: Option<Duration>,
    /// Reported link state after a successful connect
    pub link_connected: bool,
    pub characteristics: HashMap<Uuid, Vec<u8>>,
    pub read_failure: Option<MockFailure>,
    pub fail_control_writes: bool,
    /// Zero-based index of the data write that fails
    pub fail_data_write_at: Option<usize>,
}

impl MockDevice {
    pub fn connectable() -> Self {
        Self {
            advertisement: None,
            connectable: true,
            connect_failure: None,
            connect_delay: None,
            link_connected: true,
            characteristics: HashMap::new(),
            read_failure: None,
            fail_control_writes: false,
            fail_data_write_at: None,
        }
    }

    /// Seen advertising but refusing connections
    pub fn unreachable() -> Self {
        Self { connectable: false, ..Self::connectable() }
    }

    pub fn with_software_revision(mut self, revision: &[u8]) -> Self {
        self.characteristics.insert(uuids::SOFTWARE_REVISION, revision.to_vec());
        self
    }

    pub fn with_advertisement(mut self, advertisement: Advertisement) -> Self {
        self.advertisement = Some(advertisement);
        self
    }
}

/// A write observed by the mock, in issue order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub address: MacAddress,
    pub characteristic: Uuid,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
pub struct MockLog {
    pub connects: usize,
    pub disconnects: usize,
    pub reads: Vec<Uuid>,
    pub writes: Vec<RecordedWrite>,
}

#[derive(Default)]
pub struct MockCentral {
    devices: Mutex<HashMap<MacAddress, MockDevice>>,
    log: Arc<Mutex<MockLog>>,
}

impl MockCentral {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_device(&self, address: MacAddress, device: MockDevice) {
        self.devices.lock().await.insert(address, device);
    }

    /// Snapshot of everything the peripherals saw so far
    pub async fn log(&self) -> MockLog {
        self.log.lock().await.clone()
    }

    pub async fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        self.log
            .lock()
            .await
            .writes
            .iter()
            .filter(|w| w.characteristic == characteristic)
            .map(|w| w.data.clone())
            .collect()
    }
}

#[async_trait]
impl BleCentral for MockCentral {
    async fn resolve(&self, address: &MacAddress) -> Option<Box<dyn GattPeripheral>> {
        let devices = self.devices.lock().await;
        let device = devices.get(address).filter(|d| d.connectable)?;
        Some(Box::new(MockPeripheral {
            address: *address,
            device: device.clone(),
            log: Arc::clone(&self.log),
            connected: false,
            data_writes: 0,
        }))
    }

    async fn last_advertisement(&self, address: &MacAddress) -> Option<Advertisement> {
        let devices = self.devices.lock().await;
        devices.get(address).and_then(|d| d.advertisement.clone())
    }

    async fn advertisements(&self) -> Vec<Advertisement> {
        let devices = self.devices.lock().await;
        let mut advertisements: Vec<Advertisement> = devices
            .values()
            .filter_map(|d| d.advertisement.clone())
            .collect();
        advertisements.sort_by_key(|a| a.address);
        advertisements
    }
}

pub struct MockPeripheral {
    address: MacAddress,
    device: MockDevice,
    log: Arc<Mutex<MockLog>>,
    connected: bool,
    data_writes: usize,
}

#[async_trait]
impl GattPeripheral for MockPeripheral {
    async fn connect(&mut self) -> Result<()> {
        self.log.lock().await.connects += 1;
        if let Some(delay) = self.device.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = self.device.connect_failure {
            return Err(failure.to_error(None));
        }
        self.connected = self.device.link_connected;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected
    }

    async fn read(&mut self, characteristic: Uuid) -> Result<Vec<u8>> {
        if !self.connected {
            return Err(BleError::NotConnected);
        }
        self.log.lock().await.reads.push(characteristic);
        if let Some(failure) = self.device.read_failure {
            return Err(failure.to_error(Some(characteristic)));
        }
        self.device
            .characteristics
            .get(&characteristic)
            .cloned()
            .ok_or(BleError::CharacteristicNotFound(characteristic))
    }

    async fn write(&mut self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        if !self.connected {
            return Err(BleError::NotConnected);
        }

        if characteristic == uuids::OTA_CONTROL && self.device.fail_control_writes {
            return Err(BleError::Transport("control write rejected".to_string()));
        }
        if characteristic == uuids::OTA_DATA {
            let index = self.data_writes;
            self.data_writes += 1;
            if self.device.fail_data_write_at == Some(index) {
                return Err(BleError::Transport(format!("data write {} failed", index)));
            }
        }

        self.log.lock().await.writes.push(RecordedWrite {
            address: self.address,
            characteristic,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.log.lock().await.disconnects += 1;
        self.connected = false;
        Ok(())
    }
}
