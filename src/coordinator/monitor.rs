use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::{timeout, Duration, MissedTickBehavior};

use super::{CoordinatorError, Result, UpdateCoordinator};
use crate::device::{DeviceManager, MacAddress};

/// Periodic update checks, one task per device
pub struct PollMonitor {
    sessions: Arc<Mutex<HashMap<MacAddress, PollSession>>>,
    manager: Arc<DeviceManager>,
}

/// Polling task for a single device
struct PollSession {
    task_handle: tokio::task::JoinHandle<()>,
    stop_tx: mpsc::Sender<()>,
}

impl PollMonitor {
    pub fn new(manager: Arc<DeviceManager>) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            manager,
        }
    }

    /// Start polling `coordinator` every `interval`, beginning immediately
    pub async fn start(&self, coordinator: Arc<UpdateCoordinator>, interval: Duration) -> Result<()> {
        let mac = *coordinator.mac();
        if interval.is_zero() {
            return Err(CoordinatorError::InvalidInterval);
        }
        let mut sessions = self.sessions.lock().await;
        if sessions.contains_key(&mac) {
            log::warn!("Attempted to start polling {} twice", mac);
            return Err(CoordinatorError::AlreadyMonitoring(mac.to_string()));
        }

        let (stop_tx, stop_rx) = mpsc::channel(1);
        let manager = Arc::clone(&self.manager);
        let task_handle = tokio::spawn(async move {
            Self::poll_loop(coordinator, manager, interval, stop_rx).await;
        });

        sessions.insert(mac, PollSession { task_handle, stop_tx });
        Ok(())
    }

    /// Stop polling a device
    pub async fn stop(&self, mac: &MacAddress) -> Result<()> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            sessions.remove(mac)
        };

        let Some(session) = session else {
            return Err(CoordinatorError::NotMonitoring(mac.to_string()));
        };

        let _ = session.stop_tx.send(()).await;
        // Give the loop a moment to exit on its own
        if timeout(Duration::from_secs(2), session.task_handle).await.is_err() {
            log::warn!("Polling task for {} did not stop in time", mac);
        }
        Ok(())
    }

    pub async fn stop_all(&self) {
        let macs: Vec<MacAddress> = self.sessions.lock().await.keys().copied().collect();
        for mac in macs {
            let _ = self.stop(&mac).await;
        }
    }

    pub async fn is_monitoring(&self, mac: &MacAddress) -> bool {
        self.sessions.lock().await.contains_key(mac)
    }

    async fn poll_loop(
        coordinator: Arc<UpdateCoordinator>,
        manager: Arc<DeviceManager>,
        interval: Duration,
        mut stop_rx: mpsc::Receiver<()>,
    ) {
        let mac = *coordinator.mac();
        log::info!("Polling {} for firmware updates every {:?}", mac, interval);

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = stop_rx.recv() => {
                    log::info!("Stopped polling {}", mac);
                    break;
                }
                _ = ticker.tick() => {
                    if manager.is_updating(&mac) {
                        log::debug!("Skipping poll of {} while an update is running", mac);
                        continue;
                    }
                    // Failures are published on the coordinator's state
                    let _ = coordinator.refresh().await;
                }
            }
        }
    }
}
