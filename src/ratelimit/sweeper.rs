//! Dedicated background eviction task.
//!
//! The limiter already evicts idle buckets on its call path. A sweeper moves
//! that work onto a tokio task instead, so no single `allow` call pays for a
//! full scan. It is optional and owns a cancellation handle.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use super::limiter::TokenBucketLimiter;

/// Handle to a running background sweeper.
///
/// Dropping the handle stops the task at its next wakeup; use
/// [`Sweeper::shutdown`] to wait for it to finish.
pub struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Sweeper {
    /// Spawn a sweeper that evicts idle buckets every `period`.
    ///
    /// # Panics
    ///
    /// Panics if `period` is zero or if called outside a tokio runtime.
    pub fn spawn(limiter: Arc<TokenBucketLimiter>, period: Duration) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        info!(period_ms = period.as_millis() as u64, "Starting background sweeper");

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let evicted = limiter.evict_idle();
                        if evicted > 0 {
                            debug!(evicted = evicted, "Background sweep evicted idle buckets");
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            debug!("Background sweeper stopped");
        });

        Self { shutdown_tx, task }
    }

    /// Stop the sweeper and wait for the task to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.task.await {
            debug!(error = %e, "Background sweeper task ended abnormally");
        }
        info!("Background sweeper shut down");
    }
}
