//! Periodic reclaim of expired reservations.
//!
//! The sweeper is the eager half of expiry handling; verification handles
//! lapsed reservations lazily. Several sweepers may run against one ledger:
//! every reclaim is re-checked inside its own transaction.

use crate::service::{AdmissionService, ReclaimReport};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Default pause between sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Default maximum number of expired reservations handled per sweep.
pub const DEFAULT_SWEEP_BATCH: usize = 100;

/// Sweeper settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SweepConfig {
    /// Pause between sweeps
    pub interval: Duration,
    /// Maximum expired reservations per sweep
    pub batch_size: usize,
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            batch_size: DEFAULT_SWEEP_BATCH,
        }
    }
}

/// Background task reclaiming expired reservations.
#[derive(Clone, Debug)]
pub struct ReclaimSweeper {
    service: AdmissionService,
    config: SweepConfig,
}

impl ReclaimSweeper {
    /// Create a sweeper over `service`.
    #[must_use]
    pub const fn new(service: AdmissionService, config: SweepConfig) -> Self {
        Self { service, config }
    }

    /// Run one sweep.
    ///
    /// # Errors
    ///
    /// Propagates listing or drain failures from the service.
    pub async fn run_once(&self) -> admission_core::Result<ReclaimReport> {
        self.service.reclaim_expired(self.config.batch_size).await
    }

    /// Sweep on every tick until `shutdown` becomes `true`.
    ///
    /// A failed sweep is logged and retried on the next tick.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = self.config.interval.as_millis(),
            batch_size = self.config.batch_size,
            "Reclaim sweeper started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "Reclaim sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Reclaim sweeper stopped");
    }

    /// Spawn [`Self::run`] on the tokio runtime.
    #[must_use]
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
