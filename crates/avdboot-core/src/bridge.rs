//! Device bridge server lifecycle

use async_trait::async_trait;
use tracing::{info, warn};

use crate::errors::BridgeError;

/// Control over the device bridge background service
#[async_trait]
pub trait BridgeHealth: Send + Sync {
    async fn start(&self) -> Result<(), BridgeError>;

    async fn stop(&self) -> Result<(), BridgeError>;

    /// Stop then start; a failed stop skips the start
    async fn restart(&self) -> Result<(), BridgeError> {
        self.stop().await?;
        self.start().await
    }
}

/// Pre-flight check run before the baseline snapshot is taken.
///
/// A failed start is retried once through a full restart; only a failed
/// restart is reported.
pub async fn ensure_started(bridge: &dyn BridgeHealth) -> Result<(), BridgeError> {
    if let Err(e) = bridge.start().await {
        warn!("Failed to start device bridge: {}", e);
        warn!("Restarting device bridge...");
        bridge.restart().await?;
    }

    info!("Device bridge is running");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct FlakyBridge {
        failing_starts: AtomicU32,
        fail_stop: bool,
        starts: AtomicU32,
        stops: AtomicU32,
    }

    #[async_trait]
    impl BridgeHealth for FlakyBridge {
        async fn start(&self) -> Result<(), BridgeError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failing_starts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_starts.store(remaining - 1, Ordering::SeqCst);
                return Err(BridgeError::Other {
                    action: "start",
                    reason: "address in use".to_string(),
                });
            }
            Ok(())
        }

        async fn stop(&self) -> Result<(), BridgeError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if self.fail_stop {
                return Err(BridgeError::Other {
                    action: "stop",
                    reason: "no server".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_restart_is_stop_then_start() {
        let bridge = FlakyBridge::default();
        bridge.restart().await.unwrap();

        assert_eq!(bridge.stops.load(Ordering::SeqCst), 1);
        assert_eq!(bridge.starts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_restart_short_circuits_on_stop_failure() {
        let bridge = FlakyBridge {
            fail_stop: true,
            ..Default::default()
        };

        assert!(bridge.restart().await.is_err());
        assert_eq!(bridge.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ensure_started_recovers_with_restart() {
        let bridge = FlakyBridge {
            failing_starts: AtomicU32::new(1),
            ..Default::default()
        };

        ensure_started(&bridge).await.unwrap();
        assert_eq!(bridge.starts.load(Ordering::SeqCst), 2);
        assert_eq!(bridge.stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ensure_started_fails_when_restart_fails() {
        let bridge = FlakyBridge {
            failing_starts: AtomicU32::new(2),
            ..Default::default()
        };

        assert!(ensure_started(&bridge).await.is_err());
    }
}
