use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::{MatchError, Matcher};
use crate::relay::RelayHub;

/// Counts from one sweep pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub tickets_purged: u64,
    pub relays_pruned: usize,
}

/// Periodic cleanup of expired tickets and retired relay handles
///
/// Joins already purge inline, so this only bounds how long stale tickets
/// linger in a quiet queue.
pub struct ExpirySweeper {
    matcher: Matcher,
    relay: RelayHub,
}

impl ExpirySweeper {
    pub fn new(matcher: Matcher, relay: RelayHub) -> Self {
        Self { matcher, relay }
    }

    pub async fn run_once(&self) -> Result<SweepReport, MatchError> {
        let tickets_purged = self.matcher.sweep().await?;
        let relays_pruned = self.relay.prune().await;

        Ok(SweepReport {
            tickets_purged,
            relays_pruned,
        })
    }

    /// Run every `interval` until `shutdown` flips to `true`
    pub fn spawn(self, interval: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.run_once().await {
                            Ok(report) if report != SweepReport::default() => {
                                tracing::info!(
                                    "Sweep purged {} tickets, pruned {} relays",
                                    report.tickets_purged,
                                    report.relays_pruned
                                );
                            }
                            Ok(_) => {}
                            Err(e) => tracing::error!("Expiry sweep failed: {}", e),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::info!("Expiry sweeper stopping");
                            break;
                        }
                    }
                }
            }
        })
    }
}
