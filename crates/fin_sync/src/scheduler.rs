//! Background sync
//!
//! Runs a pass whenever the connection comes back and on a fixed interval
//! while online. Failures are logged at debug level only; the user is never
//! notified about a background pass.

use crate::engine::{SyncEngine, SyncOutcome};
use fin_core::network::NetworkMonitor;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

pub struct AutoSync {
    handle: JoinHandle<()>,
}

impl AutoSync {
    pub fn spawn(engine: SyncEngine, network: NetworkMonitor, period: Duration) -> Self {
        // Subscribe before spawning so a change right after this call is seen
        let mut status = network.subscribe();
        let mut was_online = status.borrow().is_online();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    changed = status.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = network.is_online();
                        if online && !was_online {
                            tracing::info!("Connection restored, syncing");
                            run_quietly(&engine).await;
                        }
                        was_online = online;
                    }
                    _ = ticker.tick() => {
                        if was_online {
                            run_quietly(&engine).await;
                        }
                    }
                }
            }
            tracing::debug!("Auto-sync stopped");
        });
        Self { handle }
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

async fn run_quietly(engine: &SyncEngine) {
    match engine.sync_all().await {
        Ok(SyncOutcome::Completed(report)) => {
            tracing::debug!("Background sync: {} replayed", report.replayed)
        }
        Ok(outcome) => tracing::debug!("Background sync: {:?}", outcome),
        Err(e) => tracing::debug!("Background sync failed: {}", e),
    }
}
