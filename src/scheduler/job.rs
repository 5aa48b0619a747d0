//! Correction job definitions.
//!
//! A `CorrectionJob` is the unit of work that travels through Redis. It
//! carries the essay id plus the dispatch generation (`task_id`) it was
//! issued under; a job whose generation no longer matches the essay row is
//! stale and must be discarded by the worker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default maximum number of correction attempts per essay.
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// A queued correction job.
///
/// Jobs are serialized into Redis and processed by workers. Retry happens at
/// the task level: a retry is a brand-new job with a fresh `task_id` and an
/// incremented attempt counter, never a mutation of the old one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrectionJob {
    /// Unique identifier for this job instance.
    pub id: Uuid,
    /// The essay to correct.
    pub essay_id: Uuid,
    /// Dispatch generation this job belongs to. Must match the essay row's
    /// `task_id` for the job to be actionable.
    pub task_id: Uuid,
    /// Which correction attempt this job represents (1-based).
    pub attempt: u32,
    /// Attempt ceiling; reaching it makes the next failure terminal.
    pub max_attempts: u32,
    /// When this job was created.
    pub created_at: DateTime<Utc>,
}

impl CorrectionJob {
    /// Creates the first-attempt job for an essay.
    pub fn new(essay_id: Uuid, task_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            essay_id,
            task_id,
            attempt: 1,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            created_at: Utc::now(),
        }
    }

    /// Sets the attempt ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Sets the attempt number (used when re-dispatching after a sweep,
    /// where earlier attempts are counted from the corrections table).
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Builds the follow-up job for the next attempt under a new dispatch
    /// generation. The old generation becomes invalid the moment the essay
    /// row is updated to carry `new_task_id`.
    pub fn next_attempt(&self, new_task_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            essay_id: self.essay_id,
            task_id: new_task_id,
            attempt: self.attempt + 1,
            max_attempts: self.max_attempts,
            created_at: Utc::now(),
        }
    }

    /// Returns whether another attempt is allowed after this one fails.
    pub fn should_retry(&self) -> bool {
        self.attempt < self.max_attempts
    }

    /// Returns the number of attempts left after this one.
    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt)
    }

    /// Returns how long ago the job was created.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.created_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_new() {
        let essay_id = Uuid::new_v4();
        let task_id = Uuid::new_v4();
        let job = CorrectionJob::new(essay_id, task_id);

        assert!(!job.id.is_nil());
        assert_eq!(job.essay_id, essay_id);
        assert_eq!(job.task_id, task_id);
        assert_eq!(job.attempt, 1);
        assert_eq!(job.max_attempts, 3);
        assert!(job.should_retry());
    }

    #[test]
    fn test_next_attempt_rotates_generation() {
        let job = CorrectionJob::new(Uuid::new_v4(), Uuid::new_v4());
        let new_task = Uuid::new_v4();
        let next = job.next_attempt(new_task);

        assert_ne!(next.id, job.id);
        assert_eq!(next.essay_id, job.essay_id);
        assert_eq!(next.task_id, new_task);
        assert_ne!(next.task_id, job.task_id);
        assert_eq!(next.attempt, 2);
    }

    #[test]
    fn test_retry_budget() {
        let job = CorrectionJob::new(Uuid::new_v4(), Uuid::new_v4()).with_max_attempts(2);
        assert!(job.should_retry());
        assert_eq!(job.remaining_attempts(), 1);

        let second = job.next_attempt(Uuid::new_v4());
        assert!(!second.should_retry());
        assert_eq!(second.remaining_attempts(), 0);
    }

    #[test]
    fn test_job_serialization() {
        let job = CorrectionJob::new(Uuid::new_v4(), Uuid::new_v4());
        let json = serde_json::to_string(&job).expect("serialization should work");
        let parsed: CorrectionJob =
            serde_json::from_str(&json).expect("deserialization should work");

        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.essay_id, job.essay_id);
        assert_eq!(parsed.task_id, job.task_id);
        assert_eq!(parsed.attempt, job.attempt);
    }
}
