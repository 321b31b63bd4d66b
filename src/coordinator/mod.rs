pub mod entity;
pub mod monitor;
pub mod snapshot;

pub use entity::{FirmwareUpdateEntity, FirmwareVersionSensor};
pub use monitor::PollMonitor;
pub use snapshot::StateSnapshot;

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use log::{debug, info, warn};

use crate::device::{DeviceVersionReader, MacAddress};
use crate::update::{ReleaseResolver, UpdateError};

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("{0}")]
    UpdateFailed(String),

    #[error("No firmware release available")]
    NoReleaseAvailable,

    #[error("Installation failed: {0}")]
    Install(#[from] UpdateError),

    #[error("Device already being monitored: {0}")]
    AlreadyMonitoring(String),

    #[error("Device not being monitored: {0}")]
    NotMonitoring(String),

    #[error("Poll interval must be greater than zero")]
    InvalidInterval,
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// What consumers of a coordinator observe
#[derive(Debug, Clone, Default)]
pub struct CoordinatorState {
    /// Last successful poll; kept when a later poll fails
    pub snapshot: Option<Arc<StateSnapshot>>,
    /// False after a failed poll, until the next successful one
    pub available: bool,
    pub last_error: Option<String>,
}

/// Polls one device's installed version and its source's latest release
pub struct UpdateCoordinator {
    mac: MacAddress,
    firmware_source: String,
    reader: Arc<DeviceVersionReader>,
    resolver: Arc<ReleaseResolver>,
    state_tx: watch::Sender<CoordinatorState>,
    refresh_lock: Mutex<()>,
}

impl UpdateCoordinator {
    pub fn new(
        mac: MacAddress,
        firmware_source: String,
        reader: Arc<DeviceVersionReader>,
        resolver: Arc<ReleaseResolver>,
    ) -> Self {
        let (state_tx, _) = watch::channel(CoordinatorState::default());
        Self {
            mac,
            firmware_source,
            reader,
            resolver,
            state_tx,
            refresh_lock: Mutex::new(()),
        }
    }

    pub fn mac(&self) -> &MacAddress {
        &self.mac
    }

    pub fn firmware_source(&self) -> &str {
        &self.firmware_source
    }

    /// Run one poll and publish its snapshot
    pub async fn refresh(&self) -> Result<Arc<StateSnapshot>> {
        // Version reads for one device never overlap
        let _serial = self.refresh_lock.lock().await;

        match self.poll().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                self.state_tx.send_replace(CoordinatorState {
                    snapshot: Some(Arc::clone(&snapshot)),
                    available: true,
                    last_error: None,
                });
                Ok(snapshot)
            }
            Err(e) => {
                warn!("Update check for {} failed: {}", self.mac, e);
                self.state_tx.send_modify(|state| {
                    state.available = false;
                    state.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// Refresh, logging instead of returning a failure
    pub async fn request_refresh(&self) {
        if let Err(e) = self.refresh().await {
            debug!("Requested refresh of {} failed: {}", self.mac, e);
        }
    }

    async fn poll(&self) -> Result<StateSnapshot> {
        let current_version = self.reader.current_version(&self.mac).await;

        let Some(latest) = self.resolver.latest(&self.firmware_source).await else {
            return Err(CoordinatorError::UpdateFailed(
                "Failed to fetch latest release info".to_string(),
            ));
        };

        info!(
            "Update check for {}: installed {}, latest {}",
            self.mac,
            current_version.as_deref().unwrap_or("unknown"),
            latest.version
        );
        Ok(StateSnapshot::new(current_version, latest, &self.firmware_source))
    }

    pub fn state(&self) -> CoordinatorState {
        self.state_tx.borrow().clone()
    }

    pub fn snapshot(&self) -> Option<Arc<StateSnapshot>> {
        self.state_tx.borrow().snapshot.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state_tx.subscribe()
    }
}
