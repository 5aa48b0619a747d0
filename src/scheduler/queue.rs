//! Redis-based correction job queue with reliable dequeue.
//!
//! # Queue structure
//!
//! - `{queue_name}`: main queue where jobs wait
//! - `{queue_name}:processing`: jobs currently being processed
//! - `{queue_name}:delayed`: sorted set of jobs scheduled for the future
//! - `{queue_name}:dead_letter`: jobs abandoned after exhausting attempts
//!
//! # Reliability
//!
//! Dequeue uses BRPOPLPUSH to atomically move a job from the main queue to
//! the processing queue, so a crashed worker never loses a job. Delayed jobs
//! (task-level retries) sit in the ZSET scored by their due time and are
//! promoted to the main queue by the reconciliation sweep.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use uuid::Uuid;

use super::job::CorrectionJob;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize job data.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    /// Job not found in the queue.
    #[error("Job {0} not found")]
    JobNotFound(Uuid),
}

/// Redis-based job queue with reliable dequeue.
pub struct JobQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Name of the main queue.
    queue_name: String,
    /// Name of the processing queue.
    processing_queue: String,
    /// Name of the delayed sorted set.
    delayed_set: String,
    /// Name of the dead letter queue.
    dead_letter_queue: String,
}

impl JobQueue {
    /// Connects to Redis and creates a new job queue.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Creates a JobQueue from an existing ConnectionManager.
    ///
    /// Useful when sharing a connection across multiple components.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        Self {
            redis,
            queue_name: queue_name.to_string(),
            processing_queue: format!("{}:processing", queue_name),
            delayed_set: format!("{}:delayed", queue_name),
            dead_letter_queue: format!("{}:dead_letter", queue_name),
        }
    }

    /// Enqueues a job for immediate processing.
    ///
    /// Jobs are added to the left of the queue (LPUSH) and dequeued from the
    /// right, giving FIFO order.
    pub async fn enqueue(&self, job: &CorrectionJob) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?;
        Ok(())
    }

    /// Schedules a job to become runnable after a delay.
    ///
    /// Used for task-level retries: the delay is minutes-scale, long enough
    /// for provider-side incidents to pass, so the job waits in a sorted set
    /// rather than blocking a worker.
    pub async fn enqueue_delayed(
        &self,
        job: &CorrectionJob,
        delay: Duration,
    ) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(job)?;
        let due = chrono::Utc::now().timestamp_millis() + delay.as_millis() as i64;

        let mut conn = self.redis.clone();
        conn.zadd::<_, _, _, ()>(&self.delayed_set, serialized, due)
            .await?;
        Ok(())
    }

    /// Promotes delayed jobs whose due time has passed into the main queue.
    ///
    /// Returns the number of jobs promoted. Safe to run concurrently: the
    /// ZREM/LPUSH pair is atomic per job, and a job removed by another
    /// promoter is simply skipped.
    pub async fn promote_due(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let now = chrono::Utc::now().timestamp_millis();

        let due_jobs: Vec<String> = conn
            .zrangebyscore(&self.delayed_set, i64::MIN, now)
            .await?;

        let mut promoted = 0;
        for job_data in due_jobs {
            let removed: i64 = conn.zrem(&self.delayed_set, &job_data).await?;
            if removed == 1 {
                conn.lpush::<_, _, ()>(&self.queue_name, &job_data).await?;
                promoted += 1;
            }
        }

        Ok(promoted)
    }

    /// Dequeues the next job, blocking until one is available or timeout.
    ///
    /// Uses BRPOPLPUSH to atomically move the job from the main queue to
    /// the processing queue.
    ///
    /// Returns `Ok(None)` if the timeout expired with no jobs available.
    pub async fn dequeue(&self, timeout: Duration) -> Result<Option<CorrectionJob>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.processing_queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match result {
            Some(data) => {
                let job: CorrectionJob = serde_json::from_str(&data)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Acknowledges a job, removing it from the processing queue.
    ///
    /// Called after the worker has reached a final disposition for the job
    /// (completed, failed, discarded, or re-dispatched as a new job).
    pub async fn ack(&self, job_id: Uuid) -> Result<(), QueueError> {
        self.remove_job_from_processing(job_id).await
    }

    /// Moves a job to the dead letter queue.
    ///
    /// Dead-lettered jobs are kept for inspection; the essay itself is
    /// marked failed through the store, so the entry is diagnostic only.
    pub async fn dead_letter(&self, job: &CorrectionJob, error: &str) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        self.remove_job_from_processing(job.id).await?;

        let dead_letter_entry = serde_json::json!({
            "job": job,
            "error": error,
            "moved_at": chrono::Utc::now().to_rfc3339(),
        });
        let serialized = serde_json::to_string(&dead_letter_entry)?;

        conn.lpush::<_, _, ()>(&self.dead_letter_queue, serialized)
            .await?;

        Ok(())
    }

    /// Returns the number of jobs waiting in the main queue.
    pub async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.queue_name).await?;
        Ok(len)
    }

    /// Returns the number of jobs currently being processed.
    pub async fn processing_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.processing_queue).await?;
        Ok(len)
    }

    /// Returns the number of jobs waiting in the delayed set.
    pub async fn delayed_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.zcard(&self.delayed_set).await?;
        Ok(len)
    }

    /// Returns the number of jobs in the dead letter queue.
    pub async fn dead_letter_len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.dead_letter_queue).await?;
        Ok(len)
    }

    /// Returns whether the main queue is empty.
    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Recovers jobs stuck in the processing queue.
    ///
    /// Called on startup to pick up jobs from workers that crashed. Jobs
    /// move back to the main queue unmodified; the worker's preflight
    /// discards them if the essay has moved on in the meantime.
    pub async fn recover_processing_jobs(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovered = 0;

        let jobs: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for job_data in jobs {
            if serde_json::from_str::<CorrectionJob>(&job_data).is_ok() {
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .lrem(&self.processing_queue, 1, &job_data)
                    .rpush(&self.queue_name, &job_data);
                pipe.query_async::<_, ()>(&mut conn).await?;
                recovered += 1;
            } else {
                // Unparseable entries cannot be retried; drop them.
                conn.lrem::<_, _, ()>(&self.processing_queue, 1, &job_data)
                    .await?;
            }
        }

        Ok(recovered)
    }

    /// Clears all queues (main, processing, delayed, and dead letter).
    ///
    /// **Warning**: this permanently deletes all jobs.
    pub async fn clear(&self) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        let mut pipe = redis::pipe();
        pipe.del(&self.queue_name)
            .del(&self.processing_queue)
            .del(&self.delayed_set)
            .del(&self.dead_letter_queue);
        pipe.query_async::<_, ()>(&mut conn).await?;

        Ok(())
    }

    /// Returns queue statistics.
    pub async fn stats(&self) -> Result<QueueStats, QueueError> {
        let (queue_len, processing_len, delayed_len, dead_letter_len) = tokio::try_join!(
            self.len(),
            self.processing_len(),
            self.delayed_len(),
            self.dead_letter_len()
        )?;

        Ok(QueueStats {
            queue_name: self.queue_name.clone(),
            pending_jobs: queue_len,
            processing_jobs: processing_len,
            delayed_jobs: delayed_len,
            dead_letter_jobs: dead_letter_len,
        })
    }

    /// Peeks at jobs in the dead letter queue without removing them.
    pub async fn peek_dead_letter(
        &self,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, QueueError> {
        let mut conn = self.redis.clone();
        let data: Vec<String> = conn
            .lrange(&self.dead_letter_queue, 0, limit as isize - 1)
            .await?;

        let entries: Result<Vec<serde_json::Value>, _> =
            data.iter().map(|s| serde_json::from_str(s)).collect();

        Ok(entries?)
    }

    /// Helper to remove a job from the processing queue by ID.
    async fn remove_job_from_processing(&self, job_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();

        let jobs: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for job_data in jobs {
            if let Ok(job) = serde_json::from_str::<CorrectionJob>(&job_data) {
                if job.id == job_id {
                    conn.lrem::<_, _, ()>(&self.processing_queue, 1, &job_data)
                        .await?;
                    return Ok(());
                }
            }
        }

        // Not found is not an error, the job may already be acked.
        Ok(())
    }

    /// Returns the queue name.
    pub fn queue_name(&self) -> &str {
        &self.queue_name
    }
}

/// Statistics about queue state.
#[derive(Debug, Clone)]
pub struct QueueStats {
    /// Name of the queue.
    pub queue_name: String,
    /// Number of jobs waiting to be processed.
    pub pending_jobs: usize,
    /// Number of jobs currently being processed.
    pub processing_jobs: usize,
    /// Number of jobs scheduled for the future.
    pub delayed_jobs: usize,
    /// Number of jobs in the dead letter queue.
    pub dead_letter_jobs: usize,
}

impl QueueStats {
    /// Returns the total number of jobs in all queues.
    pub fn total_jobs(&self) -> usize {
        self.pending_jobs + self.processing_jobs + self.delayed_jobs + self.dead_letter_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_job() -> CorrectionJob {
        CorrectionJob::new(Uuid::new_v4(), Uuid::new_v4())
    }

    #[test]
    fn test_queue_error_display() {
        let err = QueueError::ConnectionFailed("timeout".to_string());
        assert!(err.to_string().contains("timeout"));

        let err = QueueError::JobNotFound(Uuid::new_v4());
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_queue_stats() {
        let stats = QueueStats {
            queue_name: "corrections".to_string(),
            pending_jobs: 10,
            processing_jobs: 5,
            delayed_jobs: 3,
            dead_letter_jobs: 2,
        };

        assert_eq!(stats.total_jobs(), 20);
    }

    #[test]
    fn test_job_serialization_roundtrip() {
        let job = create_test_job();
        let serialized = serde_json::to_string(&job).expect("serialization should work");
        let deserialized: CorrectionJob =
            serde_json::from_str(&serialized).expect("deserialization should work");

        assert_eq!(job.id, deserialized.id);
        assert_eq!(job.essay_id, deserialized.essay_id);
    }

    #[test]
    fn test_dead_letter_entry_structure() {
        let job = create_test_job();

        let entry = serde_json::json!({
            "job": job,
            "error": "provider unavailable",
            "moved_at": chrono::Utc::now().to_rfc3339(),
        });

        let serialized = serde_json::to_string(&entry).expect("entry should serialize");
        let parsed: serde_json::Value =
            serde_json::from_str(&serialized).expect("should parse back");

        assert!(parsed.get("job").is_some());
        assert!(parsed.get("error").is_some());
        assert!(parsed.get("moved_at").is_some());
    }
}
