use std::time::Duration;
use async_trait::async_trait;
use btleplug::api::{BDAddr, Central, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use log::{debug, info, warn};
use uuid::Uuid;

use super::{Advertisement, BleCentral, BleError, GattPeripheral, Result};
use crate::device::MacAddress;

impl From<btleplug::Error> for BleError {
    fn from(e: btleplug::Error) -> Self {
        match e {
            btleplug::Error::DeviceNotFound => BleError::DeviceNotFound(e.to_string()),
            btleplug::Error::NotConnected => BleError::NotConnected,
            btleplug::Error::TimedOut(_) => BleError::Timeout,
            other => BleError::Transport(other.to_string()),
        }
    }
}

/// Central backed by the first Bluetooth adapter of the host
pub struct BtleCentral {
    adapter: Adapter,
}

impl BtleCentral {
    pub async fn new() -> Result<Self> {
        let manager = Manager::new().await?;
        let adapter = manager
            .adapters()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| BleError::Transport("No Bluetooth adapter found".to_string()))?;
        Ok(Self { adapter })
    }

    /// Scan for `duration` so the adapter cache holds fresh advertisements
    pub async fn scan(&self, duration: Duration) -> Result<()> {
        info!("Scanning for BLE devices for {:?}", duration);
        self.adapter.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(duration).await;
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn find(&self, address: &MacAddress) -> Option<Peripheral> {
        let wanted = BDAddr::from(address.octets());
        let peripherals = match self.adapter.peripherals().await {
            Ok(peripherals) => peripherals,
            Err(e) => {
                warn!("Failed to list BLE peripherals: {}", e);
                return None;
            }
        };
        peripherals.into_iter().find(|p| p.address() == wanted)
    }

    async fn advertisement_of(peripheral: &Peripheral) -> Option<Advertisement> {
        let props = peripheral.properties().await.ok().flatten()?;
        Some(Advertisement {
            address: MacAddress::new(props.address.into_inner()),
            name: props.local_name,
            service_uuids: props.services.iter().map(Uuid::to_string).collect(),
            manufacturer_data: props.manufacturer_data.into_iter().collect(),
            rssi: props.rssi,
        })
    }
}

#[async_trait]
impl BleCentral for BtleCentral {
    async fn resolve(&self, address: &MacAddress) -> Option<Box<dyn GattPeripheral>> {
        let peripheral = self.find(address).await?;
        Some(Box::new(BtlePeripheral { peripheral }))
    }

    async fn last_advertisement(&self, address: &MacAddress) -> Option<Advertisement> {
        let peripheral = self.find(address).await?;
        Self::advertisement_of(&peripheral).await
    }

    async fn advertisements(&self) -> Vec<Advertisement> {
        let Ok(peripherals) = self.adapter.peripherals().await else {
            return Vec::new();
        };
        let mut advertisements = Vec::new();
        for peripheral in peripherals {
            if let Some(advertisement) = Self::advertisement_of(&peripheral).await {
                advertisements.push(advertisement);
            }
        }
        advertisements
    }
}

pub struct BtlePeripheral {
    peripheral: Peripheral,
}

impl BtlePeripheral {
    fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or(BleError::CharacteristicNotFound(uuid))
    }
}

#[async_trait]
impl GattPeripheral for BtlePeripheral {
    async fn connect(&mut self) -> Result<()> {
        debug!("Connecting to {}", self.peripheral.address());
        self.peripheral
            .connect()
            .await
            .map_err(|e| BleError::ConnectionFailed(e.to_string()))?;
        self.peripheral.discover_services().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    async fn read(&mut self, characteristic: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.find_characteristic(characteristic)?;
        Ok(self.peripheral.read(&characteristic).await?)
    }

    async fn write(&mut self, characteristic: Uuid, data: &[u8]) -> Result<()> {
        let characteristic = self.find_characteristic(characteristic)?;
        self.peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}
