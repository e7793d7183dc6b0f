//! Sweep Scheduler

use crate::ledger::EntitlementLedger;
use crate::sweep::SweepReport;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Runs the expiration sweep on a fixed interval
pub struct SweepScheduler {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl SweepScheduler {
    /// Start sweeping; the first run happens immediately
    pub fn spawn(ledger: Arc<EntitlementLedger>, every: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut runs = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stop.changed() => break,
                }

                match ledger.run_expiration_sweep().await {
                    Ok(report) => log_report(&report),
                    Err(e) => tracing::error!(error = %e, retryable = e.is_retryable(), "expiration sweep failed"),
                }
                runs += 1;
            }

            tracing::info!(runs, "sweep scheduler stopped");
            runs
        });

        Self { shutdown, handle }
    }

    /// Stop after the in-flight sweep; returns the number of completed runs
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(true);
        self.handle.await.unwrap_or_default()
    }
}

fn log_report(report: &SweepReport) {
    if report.deferred > 0 || report.failed > 0 {
        tracing::warn!(
            deferred = report.deferred,
            failed = report.failed,
            "sweep left grants for the next run"
        );
    } else {
        tracing::debug!(examined = report.examined, expired = report.expired, "sweep tick");
    }
}
