//! Periodic device polling for a single boot attempt

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::BridgeHealth;
use crate::devices::{DeviceRegistry, DeviceSnapshot, NewDevice};
use crate::errors::QueryError;

/// When polling restarts the device bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeRestartPolicy {
    /// Restart after this many consecutive polls without a ready device; 0 disables
    pub every_n_polls: u32,
    /// Reset the poll counter after a restart caused by a query error
    pub reset_on_query_error: bool,
}

impl Default for BridgeRestartPolicy {
    fn default() -> Self {
        Self {
            every_n_polls: 10,
            reset_on_query_error: true,
        }
    }
}

/// Polls the registry until the new emulator reports `device`
pub struct DevicePoller {
    registry: Arc<dyn DeviceRegistry>,
    bridge: Arc<dyn BridgeHealth>,
    baseline: Arc<DeviceSnapshot>,
    interval: Duration,
    policy: BridgeRestartPolicy,
    polls_since_restart: u32,
    tracked: Option<String>,
}

impl DevicePoller {
    pub fn new(
        registry: Arc<dyn DeviceRegistry>,
        bridge: Arc<dyn BridgeHealth>,
        baseline: Arc<DeviceSnapshot>,
        interval: Duration,
        policy: BridgeRestartPolicy,
    ) -> Self {
        Self {
            registry,
            bridge,
            baseline,
            interval,
            policy,
            polls_since_restart: 0,
            tracked: None,
        }
    }

    /// Serial currently being followed, if a new device has been seen
    pub fn tracked_serial(&self) -> Option<&str> {
        self.tracked.as_deref()
    }

    /// Run the poll loop on its own task. The receiver yields the ready serial
    /// at most once; the task ends after sending it or when `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> (JoinHandle<()>, mpsc::Receiver<String>) {
        let (ready_tx, ready_rx) = mpsc::channel(1);
        let handle = tokio::spawn(self.run(ready_tx, cancel));
        (handle, ready_rx)
    }

    async fn run(mut self, ready_tx: mpsc::Sender<String>, cancel: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Device polling cancelled");
                    return;
                }
                _ = ticker.tick() => {}
            }

            let ready = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Device polling cancelled");
                    return;
                }
                ready = self.poll_once() => ready,
            };

            if let Some(serial) = ready {
                let _ = ready_tx.send(serial).await;
                return;
            }
        }
    }

    /// One poll iteration; returns the serial once it is ready
    pub async fn poll_once(&mut self) -> Option<String> {
        self.polls_since_restart += 1;

        if self.policy.every_n_polls > 0 && self.polls_since_restart % self.policy.every_n_polls == 0 {
            warn!(
                "No ready emulator after {} polls, restarting device bridge...",
                self.polls_since_restart
            );
            if let Err(e) = self.bridge.restart().await {
                warn!("Failed to restart device bridge: {}", e);
            }
        }

        match self.query().await {
            Err(e) => {
                warn!("Failed to query new emulator: {}", e);
                warn!("Restarting device bridge and retrying");
                if let Err(e) = self.bridge.restart().await {
                    warn!("Failed to restart device bridge: {}", e);
                }
                if self.policy.reset_on_query_error {
                    self.polls_since_restart = 0;
                }
                None
            }
            Ok(Some(device)) => {
                if self.tracked.as_deref() != Some(device.serial.as_str()) {
                    info!("New emulator found: {}, state: {}", device.serial, device.state);
                    self.tracked = Some(device.serial.clone());
                }

                if device.state.is_ready() {
                    Some(device.serial)
                } else {
                    debug!("Emulator {} is {}, waiting", device.serial, device.state);
                    None
                }
            }
            Ok(None) => {
                if let Some(serial) = self.tracked.take() {
                    warn!("Emulator {} disappeared from the device list", serial);
                } else {
                    debug!("New emulator not found yet");
                }
                None
            }
        }
    }

    async fn query(&self) -> Result<Option<NewDevice>, QueryError> {
        match &self.tracked {
            Some(serial) => {
                let snapshot = self.registry.snapshot().await?;
                Ok(snapshot
                    .get(serial)
                    .map(|state| NewDevice {
                        serial: serial.clone(),
                        state: state.clone(),
                    })
                    .or_else(|| snapshot.first_new_since(&self.baseline)))
            }
            None => self.registry.find_new_device(&self.baseline).await,
        }
    }
}
