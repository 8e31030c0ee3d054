//! Background recovery worker.
//!
//! Periodically sweeps for transfers with stale heartbeats and settles them
//! through the coordinator. Multiple workers may run against the same store;
//! the CAS phase transitions make their sweeps race-safe.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::RecoveryConfig;

use super::RecoveryCoordinator;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub scan_interval: Duration,
    pub stale_threshold: Duration,
    pub batch_size: usize,
}

impl From<&RecoveryConfig> for WorkerConfig {
    fn from(cfg: &RecoveryConfig) -> Self {
        Self {
            scan_interval: Duration::from_secs(cfg.scan_interval_secs),
            stale_threshold: Duration::from_secs(cfg.stale_threshold_secs),
            batch_size: cfg.batch_size,
        }
    }
}

pub struct RecoveryWorker {
    coordinator: Arc<RecoveryCoordinator>,
    config: WorkerConfig,
}

impl RecoveryWorker {
    pub fn new(coordinator: Arc<RecoveryCoordinator>, config: WorkerConfig) -> Self {
        Self {
            coordinator,
            config,
        }
    }

    /// One sweep. Returns how many transfers were settled.
    pub async fn sweep_once(&self) -> usize {
        match self
            .coordinator
            .recover_all(self.config.stale_threshold, self.config.batch_size)
            .await
        {
            Ok(0) => {
                debug!("recovery sweep: nothing stuck");
                0
            }
            Ok(n) => {
                info!(settled = n, "recovery sweep settled stuck transfers");
                n
            }
            Err(e) => {
                error!(error = %e, "recovery sweep failed");
                0
            }
        }
    }

    /// Run sweeps forever. Spawn this on the runtime; dropping the task is
    /// the shutdown path.
    pub async fn run(self) {
        info!(
            scan_interval = ?self.config.scan_interval,
            stale_threshold = ?self.config.stale_threshold,
            batch_size = self.config.batch_size,
            "recovery worker started"
        );
        let mut ticker = tokio::time::interval(self.config.scan_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_once().await;
        }
    }
}
