use std::collections::HashMap;
use std::sync::Arc;
use reqwest::Client;
use tokio::sync::RwLock;

use crate::ble::BleCentral;
use crate::config::{DeviceSettings, Settings};
use crate::coordinator::{FirmwareUpdateEntity, FirmwareVersionSensor, PollMonitor, UpdateCoordinator};
use crate::device::{
    register_device, DeviceDirectory, DeviceEntry, DeviceManager, DeviceVersionReader, MacAddress,
    Result,
};
use crate::ota::OtaEngine;
use crate::update::{ArtifactFetcher, FirmwareDownloader, ReleaseResolver, UpdateService};

/// Everything the host wires together at start-up
pub struct AppState {
    pub settings: Settings,
    pub manager: Arc<DeviceManager>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub central: Arc<dyn BleCentral>,
    pub reader: Arc<DeviceVersionReader>,
    pub resolver: Arc<ReleaseResolver>,
    pub service: Arc<UpdateService>,
    pub monitor: PollMonitor,
    coordinators: RwLock<HashMap<MacAddress, Arc<UpdateCoordinator>>>,
}

impl AppState {
    pub fn new(settings: Settings, central: Arc<dyn BleCentral>, directory: Arc<dyn DeviceDirectory>) -> Self {
        // One HTTP client per process, shared by metadata and binary requests
        let client = Client::new();
        let downloader = Arc::new(ArtifactFetcher::new(client.clone(), settings.download.clone()));
        Self::with_parts(settings, client, central, directory, downloader)
    }

    /// Build with a specific firmware downloader
    pub fn with_parts(
        settings: Settings,
        client: Client,
        central: Arc<dyn BleCentral>,
        directory: Arc<dyn DeviceDirectory>,
        downloader: Arc<dyn FirmwareDownloader>,
    ) -> Self {
        let manager = Arc::new(DeviceManager::new());
        let reader = Arc::new(DeviceVersionReader::new(
            Arc::clone(&central),
            settings.version_reader.clone(),
        ));
        let resolver = Arc::new(ReleaseResolver::new(client, settings.release.clone()));
        let engine = Arc::new(OtaEngine::new(Arc::clone(&central), settings.ota.clone()));
        let service = Arc::new(UpdateService::new(downloader, engine));
        let monitor = PollMonitor::new(Arc::clone(&manager));

        Self {
            settings,
            manager,
            directory,
            central,
            reader,
            resolver,
            service,
            monitor,
            coordinators: RwLock::new(HashMap::new()),
        }
    }

    /// Configure a device: registry entry, directory record and coordinator
    pub async fn setup_device(&self, device: &DeviceSettings) -> Result<DeviceEntry> {
        let entry = self.manager.add_entry(device).await?;

        match register_device(self.directory.as_ref(), &entry.mac, &entry.entry_id).await {
            Ok((record, info)) => {
                self.manager.attach_record(&entry.mac, record.id, info).await?;
            }
            Err(e) => {
                self.manager.remove_entry(&entry.mac).await;
                return Err(e);
            }
        }

        let coordinator = Arc::new(UpdateCoordinator::new(
            entry.mac,
            entry.firmware_source.clone(),
            Arc::clone(&self.reader),
            Arc::clone(&self.resolver),
        ));
        self.coordinators.write().await.insert(entry.mac, coordinator);

        Ok(self.manager.get_entry(&entry.mac).await.unwrap_or(entry))
    }

    /// Set up every device listed in the settings, skipping invalid ones
    pub async fn setup_configured_devices(&self) -> Vec<DeviceEntry> {
        let mut entries = Vec::new();
        for device in &self.settings.devices {
            match self.setup_device(device).await {
                Ok(entry) => entries.push(entry),
                Err(e) => log::error!("Skipping device {}: {}", device.mac_address, e),
            }
        }
        entries
    }

    pub async fn teardown_device(&self, mac: &MacAddress) -> Option<DeviceEntry> {
        let _ = self.monitor.stop(mac).await;
        self.coordinators.write().await.remove(mac);
        self.manager.remove_entry(mac).await
    }

    pub async fn coordinator(&self, mac: &MacAddress) -> Option<Arc<UpdateCoordinator>> {
        self.coordinators.read().await.get(mac).cloned()
    }

    pub async fn update_entity(&self, mac: &MacAddress) -> Option<FirmwareUpdateEntity> {
        let coordinator = self.coordinator(mac).await?;
        let device_info = self.manager.get_entry(mac).await.and_then(|e| e.device_info);
        Some(FirmwareUpdateEntity::new(
            coordinator,
            Arc::clone(&self.service),
            Arc::clone(&self.manager),
            device_info,
        ))
    }

    pub async fn version_sensor(&self, mac: &MacAddress) -> Option<FirmwareVersionSensor> {
        self.coordinator(mac).await.map(FirmwareVersionSensor::new)
    }

    /// Start periodic polling of every configured device
    pub async fn start_polling(&self) {
        let coordinators: Vec<Arc<UpdateCoordinator>> =
            self.coordinators.read().await.values().cloned().collect();
        for coordinator in coordinators {
            if let Err(e) = self.monitor.start(coordinator, self.settings.poll_interval()).await {
                log::warn!("{}", e);
            }
        }
    }

    pub async fn shutdown(&self) {
        self.monitor.stop_all().await;
        log::info!("Stopped all update polling");
    }
}
