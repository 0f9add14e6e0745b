// src/hardware/watchdog.rs - Periodic hardware watchdog feeder
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Duration, MissedTickBehavior};

use super::Hal;

/// Feeds the HAL watchdog on a fixed interval until stopped.
pub struct HardwareWatchdog {
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl HardwareWatchdog {
    pub fn start(hal: Arc<dyn Hal>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::debug!("Watchdog feeder shutting down");
                        break;
                    }
                    _ = interval.tick() => hal.watchdog_feed().await,
                }
            }
        });
        tracing::info!("Watchdog feeder started, every {}ms", period.as_millis());
        Self { shutdown_tx, task }
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            tracing::warn!("Watchdog task ended abnormally: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::hardware::VirtualHal;

    #[tokio::test]
    async fn test_watchdog_feeds_until_stopped() {
        let hal = Arc::new(VirtualHal::from_config(&Config::default()));
        let watchdog = HardwareWatchdog::start(hal.clone(), Duration::from_millis(5));
        tokio::time::sleep(Duration::from_millis(30)).await;
        watchdog.stop().await;
        let fed = hal.watchdog_feeds().await;
        assert!(fed >= 2);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(hal.watchdog_feeds().await, fed);
    }
}
