//! Liveness sweep.
//!
//! Runs on its own timer so hosts go inactive even when no datagrams arrive.

use std::time::Duration;

use anyhow::Result;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::registry::Registry;

pub struct ExpirySweeper {
    registry: Registry,
    threshold: Duration,
    every: Duration,
    shutdown: broadcast::Receiver<()>,
}

impl ExpirySweeper {
    pub fn new(
        registry: Registry,
        threshold: Duration,
        every: Duration,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            threshold,
            every,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            threshold_secs = self.threshold.as_secs(),
            every_secs = self.every.as_secs(),
            "expiry sweeper starting"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("expiry sweeper shutting down");
                    return Ok(());
                }
                _ = ticker.tick() => self.sweep().await,
            }
        }
    }

    async fn sweep(&self) {
        let registry = self.registry.clone();
        let threshold = self.threshold;
        match tokio::task::spawn_blocking(move || registry.expire_stale(threshold)).await {
            Ok(Ok(expired)) => {
                for mac in expired {
                    tracing::info!(mac = %mac, "host inactive");
                }
            }
            Ok(Err(e)) => tracing::error!(error = %e, "expiry sweep failed"),
            Err(e) => tracing::error!(error = %e, "expiry sweep task panicked"),
        }
    }
}
