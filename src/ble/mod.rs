pub mod mock;
#[cfg(feature = "bluetooth")]
pub mod btle;

use std::collections::BTreeMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::MacAddress;

#[cfg(feature = "bluetooth")]
pub use btle::BtleCentral;

/// GATT services and characteristics used by the sensor firmware
pub mod uuids {
    use uuid::Uuid;

    pub const ENVIRONMENTAL_SENSING_SERVICE: Uuid =
        Uuid::from_u128(0x0000181a_0000_1000_8000_00805f9b34fb);
    /// Software revision string (Device Information Service)
    pub const SOFTWARE_REVISION: Uuid =
        Uuid::from_u128(0x00002a28_0000_1000_8000_00805f9b34fb);
    /// Vendor OTA control characteristic, takes one command byte
    pub const OTA_CONTROL: Uuid =
        Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1912);
    /// Vendor OTA data characteristic, takes firmware chunks
    pub const OTA_DATA: Uuid =
        Uuid::from_u128(0x00010203_0405_0607_0809_0a0b0c0d1910);
}

#[derive(Debug, thiserror::Error)]
pub enum BleError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Characteristic not found: {0}")]
    CharacteristicNotFound(Uuid),

    #[error("Device not connected")]
    NotConnected,

    #[error("Operation timed out")]
    Timeout,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Bluetooth transport error: {0}")]
    Transport(String),
}

impl BleError {
    /// Missing device or characteristic, as opposed to a link failure
    pub fn is_not_found(&self) -> bool {
        matches!(self, BleError::DeviceNotFound(_) | BleError::CharacteristicNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, BleError>;

/// Passively observed advertisement of a nearby device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Advertisement {
    pub address: MacAddress,
    pub name: Option<String>,
    pub service_uuids: Vec<String>,
    /// Vendor data keyed by company identifier
    pub manufacturer_data: BTreeMap<u16, Vec<u8>>,
    pub rssi: Option<i16>,
}

impl Advertisement {
    pub fn new(address: MacAddress) -> Self {
        Self {
            address,
            name: None,
            service_uuids: Vec::new(),
            manufacturer_data: BTreeMap::new(),
            rssi: None,
        }
    }

    pub fn is_atc_device(&self) -> bool {
        crate::device::is_atc_device(self.name.as_deref(), &self.service_uuids)
    }
}

/// Access to the host's Bluetooth adapter
#[async_trait]
pub trait BleCentral: Send + Sync {
    /// Connectable handle for `address`, `None` when the device is not reachable
    async fn resolve(&self, address: &MacAddress) -> Option<Box<dyn GattPeripheral>>;

    /// Most recent advertisement seen from `address`
    async fn last_advertisement(&self, address: &MacAddress) -> Option<Advertisement>;

    /// All advertisements currently known to the adapter
    async fn advertisements(&self) -> Vec<Advertisement>;
}

/// A single BLE peripheral. Exclusively owned by one operation at a time.
#[async_trait]
pub trait GattPeripheral: Send + Sync {
    async fn connect(&mut self) -> Result<()>;

    /// Link-layer connection state
    async fn is_connected(&self) -> bool;

    async fn read(&mut self, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Write with response; returns once the peripheral acknowledged
    async fn write(&mut self, characteristic: Uuid, data: &[u8]) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;
}
