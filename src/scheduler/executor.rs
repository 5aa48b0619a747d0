//! Correction job execution.
//!
//! The executor owns the per-job pipeline: preflight the job against the
//! essay's current state, claim the essay, call the provider gateway,
//! normalize the response, and commit or fail through the store. Every step
//! is guarded so that duplicate deliveries and stale generations fall out as
//! harmless discards.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ProviderError;
use crate::gateway::{CorrectionRequest, ProviderGateway};
use crate::model::EssayStatus;
use crate::normalize::{normalize, AliasTable};
use crate::notify::StatusNotifier;
use crate::store::{EssayStore, StoreError};

use super::job::CorrectionJob;
use super::queue::{JobQueue, QueueError};

/// Errors from the dispatch layer (store or queue plumbing, not grading
/// outcomes, which are modeled as `JobOutcome`).
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Store operation failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Queue operation failed.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

/// What a job should do, decided before any state is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobDisposition {
    /// Essay is pending and the job carries the live generation: proceed.
    Run,
    /// Essay already reached a terminal state: redelivery no-op.
    AlreadyFinal,
    /// Job's generation was invalidated, or another worker holds the claim.
    Stale,
}

/// Final disposition of one processed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Result committed; essay completed.
    Completed,
    /// Essay failed terminally.
    Failed,
    /// Job was a duplicate or stale and touched nothing.
    Discarded,
    /// Transient failure; a follow-up job was scheduled.
    Requeued,
}

/// Classifies a job against the essay's current state.
///
/// Pure function: the actual claim still happens through a guarded update,
/// this only avoids pointless claims and gives duplicate deliveries a
/// precise name in the logs.
pub fn preflight(status: EssayStatus, essay_task_id: Uuid, job_task_id: Uuid) -> JobDisposition {
    if status.is_terminal() {
        return JobDisposition::AlreadyFinal;
    }
    if essay_task_id != job_task_id {
        return JobDisposition::Stale;
    }
    match status {
        EssayStatus::Pending => JobDisposition::Run,
        // Same generation but already claimed: a duplicate delivery.
        // A crashed claim is repaired by the sweep, not by redelivery.
        _ => JobDisposition::Stale,
    }
}

/// Whether a failed provider call earns a task-level retry.
///
/// Only transient errors are worth another attempt; an auth rejection or a
/// malformed response comes back identical on retry, so those fail the essay
/// immediately instead of burning the attempt budget.
pub fn should_schedule_retry(err: &ProviderError, job: &CorrectionJob) -> bool {
    err.is_transient() && job.should_retry()
}

/// Executes correction jobs end to end.
pub struct CorrectionExecutor {
    store: Arc<EssayStore>,
    gateway: Arc<ProviderGateway>,
    queue: Arc<JobQueue>,
    notifier: Arc<dyn StatusNotifier>,
    default_grade: String,
    retry_delay: Duration,
}

impl CorrectionExecutor {
    /// Creates a new executor.
    pub fn new(
        store: Arc<EssayStore>,
        gateway: Arc<ProviderGateway>,
        queue: Arc<JobQueue>,
        notifier: Arc<dyn StatusNotifier>,
        default_grade: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            store,
            gateway,
            queue,
            notifier,
            default_grade: default_grade.into(),
            retry_delay,
        }
    }

    /// Processes one job to a final outcome.
    ///
    /// Grading failures are outcomes, not errors; `Err` means the store or
    /// queue itself is unavailable and the caller should requeue the job
    /// wholesale.
    pub async fn execute(&self, job: &CorrectionJob) -> Result<JobOutcome, DispatchError> {
        let essay = match self.store.get_essay(job.essay_id).await? {
            Some(essay) => essay,
            None => {
                warn!(
                    job_id = %job.id,
                    essay_id = %job.essay_id,
                    "Job references an unknown essay, discarding"
                );
                return Ok(JobOutcome::Discarded);
            }
        };

        match preflight(essay.status, essay.task_id, job.task_id) {
            JobDisposition::Run => {}
            disposition => {
                debug!(
                    job_id = %job.id,
                    essay_id = %essay.id,
                    status = %essay.status,
                    disposition = ?disposition,
                    "Discarding non-actionable job"
                );
                return Ok(JobOutcome::Discarded);
            }
        }

        // The claim itself. Losing it means another worker (or a newer
        // generation) got there first.
        if !self.store.begin_correcting(essay.id, job.task_id).await? {
            debug!(job_id = %job.id, essay_id = %essay.id, "Lost the claim race, discarding");
            return Ok(JobOutcome::Discarded);
        }
        self.notifier
            .status_changed(essay.id, EssayStatus::Correcting, None)
            .await;

        let correction = self
            .store
            .create_correction(essay.id, job.attempt as i32)
            .await?;

        let request = CorrectionRequest {
            text: essay.content.clone(),
            title: essay.title.clone(),
            grade: self.default_grade.clone(),
        };

        match self.gateway.correct(&request).await {
            Ok(raw) => {
                let table = AliasTable::for_provider(&raw.provider);
                match normalize(&raw, &table) {
                    Ok(result) => {
                        match self
                            .store
                            .commit_completed(essay.id, correction.id, job.task_id, &result)
                            .await
                        {
                            Ok(()) => {
                                info!(
                                    essay_id = %essay.id,
                                    correction_id = %correction.id,
                                    provider = %raw.provider,
                                    score = result.scores.total,
                                    synthetic = raw.synthetic,
                                    latency_ms = raw.latency_ms,
                                    "Correction committed"
                                );
                                self.notifier
                                    .status_changed(essay.id, EssayStatus::Completed, None)
                                    .await;
                                Ok(JobOutcome::Completed)
                            }
                            Err(StoreError::ConsistencyViolation { reason, .. }) => {
                                warn!(
                                    essay_id = %essay.id,
                                    correction_id = %correction.id,
                                    reason = %reason,
                                    "Commit rejected, discarding result"
                                );
                                self.store
                                    .fail_correction_row(correction.id, &reason)
                                    .await?;
                                Ok(JobOutcome::Discarded)
                            }
                            Err(e) => Err(e.into()),
                        }
                    }
                    // A payload the alias table cannot make sense of will
                    // not improve on retry; fail terminally.
                    Err(norm_err) => {
                        let message = format!("Normalization failed: {}", norm_err);
                        warn!(
                            essay_id = %essay.id,
                            correction_id = %correction.id,
                            provider = %raw.provider,
                            error = %norm_err,
                            "Unusable provider payload"
                        );
                        if self
                            .store
                            .mark_failed(essay.id, correction.id, &message)
                            .await?
                        {
                            self.notifier
                                .status_changed(essay.id, EssayStatus::Failed, Some(&message))
                                .await;
                        }
                        Ok(JobOutcome::Failed)
                    }
                }
            }
            Err(provider_err) => {
                let message = format!("Provider call failed: {}", provider_err);

                if should_schedule_retry(&provider_err, job) {
                    self.store
                        .fail_correction_row(correction.id, &message)
                        .await?;

                    let new_task_id = Uuid::new_v4();
                    if self
                        .store
                        .requeue_for_retry(essay.id, job.task_id, new_task_id)
                        .await?
                    {
                        self.notifier
                            .status_changed(essay.id, EssayStatus::Pending, None)
                            .await;
                        let next = job.next_attempt(new_task_id);
                        self.queue.enqueue_delayed(&next, self.retry_delay).await?;
                        warn!(
                            essay_id = %essay.id,
                            attempt = job.attempt,
                            remaining = job.remaining_attempts(),
                            delay_secs = self.retry_delay.as_secs(),
                            error = %provider_err,
                            "Correction attempt failed, retry scheduled"
                        );
                        Ok(JobOutcome::Requeued)
                    } else {
                        // State moved under us between claim and reset.
                        debug!(essay_id = %essay.id, "Retry reset lost its guard, discarding");
                        Ok(JobOutcome::Discarded)
                    }
                } else {
                    if self
                        .store
                        .mark_failed(essay.id, correction.id, &message)
                        .await?
                    {
                        self.notifier
                            .status_changed(essay.id, EssayStatus::Failed, Some(&message))
                            .await;
                    }
                    warn!(
                        essay_id = %essay.id,
                        attempts = job.attempt,
                        transient = provider_err.is_transient(),
                        error = %provider_err,
                        "No retry for this failure, essay failed"
                    );
                    Ok(JobOutcome::Failed)
                }
            }
        }
    }
}
