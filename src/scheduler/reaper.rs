//! Reconciliation sweep.
//!
//! The sweep is the self-healing half of the pipeline. It runs on a timer
//! and repairs every way an essay can fall out of the happy path:
//!
//! - delayed retry jobs whose due time has passed are promoted to the queue
//! - essays stuck in `correcting` (worker crash, lost ack) are reset to
//!   `pending` under a fresh generation, or failed once their attempt
//!   budget is spent
//! - essays stuck in `pending` (enqueue lost after the database write) are
//!   re-dispatched under a fresh generation
//!
//! Every repair rotates the essay's `task_id`, so any job still in flight
//! for the old generation self-discards at preflight.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::model::EssayStatus;
use crate::notify::StatusNotifier;
use crate::store::EssayStore;

use super::executor::DispatchError;
use super::job::CorrectionJob;
use super::queue::JobQueue;

/// Summary of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Delayed jobs promoted to the main queue.
    pub promoted: usize,
    /// Stale `correcting` essays reset and re-dispatched.
    pub reset_stale: usize,
    /// Stuck `pending` essays re-dispatched.
    pub redispatched: usize,
    /// Essays failed terminally for exhausting their attempt budget.
    pub failed: usize,
}

impl SweepReport {
    /// Returns whether the pass repaired anything.
    pub fn is_quiet(&self) -> bool {
        *self == SweepReport::default()
    }
}

/// Periodic reconciliation sweeper.
pub struct Reaper {
    store: Arc<EssayStore>,
    queue: Arc<JobQueue>,
    notifier: Arc<dyn StatusNotifier>,
    sweep_interval: Duration,
    stale_after: Duration,
    pending_redispatch_after: Duration,
    max_attempts: u32,
}

impl Reaper {
    /// Creates a new reaper.
    pub fn new(
        config: &AppConfig,
        store: Arc<EssayStore>,
        queue: Arc<JobQueue>,
        notifier: Arc<dyn StatusNotifier>,
    ) -> Self {
        Self {
            store,
            queue,
            notifier,
            sweep_interval: config.sweep_interval,
            stale_after: config.stale_after,
            pending_redispatch_after: config.pending_redispatch_after,
            max_attempts: config.max_attempts,
        }
    }

    /// Runs sweep passes until a shutdown signal arrives.
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.sweep_interval.as_secs(),
            "Reconciliation sweep started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.sweep_interval) => {
                    match self.sweep_once().await {
                        Ok(report) if !report.is_quiet() => {
                            info!(
                                promoted = report.promoted,
                                reset_stale = report.reset_stale,
                                redispatched = report.redispatched,
                                failed = report.failed,
                                "Sweep pass repaired state"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "Sweep pass failed");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Reconciliation sweep stopped");
                    break;
                }
            }
        }
    }

    /// Performs one sweep pass.
    pub async fn sweep_once(&self) -> Result<SweepReport, DispatchError> {
        let mut report = SweepReport {
            promoted: self.queue.promote_due().await?,
            ..Default::default()
        };

        self.repair_stale_correcting(&mut report).await?;
        self.redispatch_stuck_pending(&mut report).await?;

        Ok(report)
    }

    /// Resets essays orphaned in `correcting`, or fails them once the
    /// attempt budget is spent.
    async fn repair_stale_correcting(&self, report: &mut SweepReport) -> Result<(), DispatchError> {
        let stale = self.store.stale_correcting(self.stale_after).await?;

        for essay in stale {
            let attempts = self.store.attempts_used(essay.id).await?;

            if attempts >= self.max_attempts as i64 {
                let message = format!(
                    "Abandoned after {} attempts with no committed result",
                    attempts
                );
                if self.store.fail_stuck(essay.id, &message).await? {
                    warn!(essay_id = %essay.id, attempts, "Stale essay failed terminally");
                    self.notifier
                        .status_changed(essay.id, EssayStatus::Failed, Some(&message))
                        .await;
                    report.failed += 1;
                }
                continue;
            }

            let new_task_id = Uuid::new_v4();
            if !self
                .store
                .requeue_for_retry(essay.id, essay.task_id, new_task_id)
                .await?
            {
                // Someone else repaired it between the scan and the reset.
                continue;
            }

            let job = CorrectionJob::new(essay.id, new_task_id)
                .with_max_attempts(self.max_attempts)
                .with_attempt(attempts as u32 + 1);
            self.queue.enqueue(&job).await?;

            warn!(
                essay_id = %essay.id,
                attempt = job.attempt,
                "Stale correcting essay reset and re-dispatched"
            );
            self.notifier
                .status_changed(essay.id, EssayStatus::Pending, None)
                .await;
            report.reset_stale += 1;
        }

        Ok(())
    }

    /// Re-dispatches essays whose enqueue was lost after the database write.
    async fn redispatch_stuck_pending(&self, report: &mut SweepReport) -> Result<(), DispatchError> {
        let stuck = self
            .store
            .stuck_pending(self.pending_redispatch_after)
            .await?;

        for essay in stuck {
            let attempts = self.store.attempts_used(essay.id).await?;

            if attempts >= self.max_attempts as i64 {
                let message = format!(
                    "Abandoned after {} attempts with no committed result",
                    attempts
                );
                if self.store.fail_stuck(essay.id, &message).await? {
                    warn!(essay_id = %essay.id, attempts, "Stuck pending essay failed terminally");
                    self.notifier
                        .status_changed(essay.id, EssayStatus::Failed, Some(&message))
                        .await;
                    report.failed += 1;
                }
                continue;
            }

            let new_task_id = Uuid::new_v4();
            if !self
                .store
                .redispatch_pending(essay.id, essay.task_id, new_task_id)
                .await?
            {
                continue;
            }

            let job = CorrectionJob::new(essay.id, new_task_id)
                .with_max_attempts(self.max_attempts)
                .with_attempt(attempts as u32 + 1);
            self.queue.enqueue(&job).await?;

            warn!(essay_id = %essay.id, "Stuck pending essay re-dispatched");
            report.redispatched += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sweep_report_quiet() {
        assert!(SweepReport::default().is_quiet());

        let report = SweepReport {
            promoted: 1,
            ..Default::default()
        };
        assert!(!report.is_quiet());
    }

    #[test]
    fn test_sweep_report_accumulates() {
        let mut report = SweepReport::default();
        report.reset_stale += 1;
        report.failed += 2;

        assert_eq!(report.reset_stale, 1);
        assert_eq!(report.failed, 2);
        assert!(!report.is_quiet());
    }
}
