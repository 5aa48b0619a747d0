//! Worker pool for processing correction jobs from the Redis queue.
//!
//! Each worker runs as an independent async task, pulling jobs with a
//! blocking dequeue and handing them to the `CorrectionExecutor`. Shutdown
//! is coordinated through a broadcast channel; workers finish their current
//! job before stopping.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;

use super::executor::{CorrectionExecutor, JobOutcome};
use super::job::CorrectionJob;
use super::queue::{JobQueue, QueueError};

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to connect to the job queue.
    #[error("Queue connection failed: {0}")]
    QueueConnection(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Jobs that ended with a committed result.
    pub jobs_completed: u64,
    /// Jobs that ended with a terminal failure.
    pub jobs_failed: u64,
    /// Jobs discarded as stale or duplicate.
    pub jobs_discarded: u64,
    /// Jobs requeued for a later attempt.
    pub jobs_requeued: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed.
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed + self.jobs_discarded + self.jobs_requeued
    }

    /// Returns the share of processed jobs that committed a result.
    pub fn completion_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_discarded: AtomicU64,
    jobs_requeued: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            jobs_discarded: AtomicU64::new(0),
            jobs_requeued: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_outcome(&self, outcome: JobOutcome, duration: Duration) {
        let counter = match outcome {
            JobOutcome::Completed => &self.jobs_completed,
            JobOutcome::Failed => &self.jobs_failed,
            JobOutcome::Discarded => &self.jobs_discarded,
            JobOutcome::Requeued => &self.jobs_requeued,
        };
        counter.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let discarded = self.jobs_discarded.load(Ordering::SeqCst);
        let requeued = self.jobs_requeued.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_jobs = completed + failed + discarded + requeued;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            jobs_discarded: discarded,
            jobs_requeued: requeued,
            average_job_duration: average_duration,
        }
    }
}

/// Worker pool managing multiple workers over a shared queue.
pub struct WorkerPool {
    num_workers: usize,
    poll_interval: Duration,
    job_timeout: Duration,
    shutdown_timeout: Duration,
    queue: Arc<JobQueue>,
    executor: Arc<CorrectionExecutor>,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    /// Creates a worker pool over an existing queue connection.
    pub fn new(config: &AppConfig, queue: Arc<JobQueue>, executor: Arc<CorrectionExecutor>) -> Self {
        // Buffer size of 1 is sufficient since the signal is sent once.
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            num_workers: config.num_workers,
            poll_interval: config.poll_interval,
            job_timeout: config.job_timeout,
            shutdown_timeout: config.shutdown_timeout,
            queue,
            executor,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers in the pool.
    ///
    /// Jobs left in the processing queue by a previous run are recovered
    /// first.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        match self.queue.recover_processing_jobs().await {
            Ok(recovered) => {
                if recovered > 0 {
                    info!(recovered, "Recovered jobs from processing queue");
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to recover processing jobs");
            }
        }

        for i in 0..self.num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&self.queue),
                executor: Arc::clone(&self.executor),
                shutdown_rx: self.shutdown_tx.subscribe(),
                poll_interval: self.poll_interval,
                job_timeout: self.job_timeout,
                stats: Arc::clone(&self.stats),
            };

            let handle = tokio::spawn(async move {
                worker.run().await;
            });

            self.worker_handles.push(handle);
        }

        self.is_running.store(true, Ordering::SeqCst);
        info!(num_workers = self.num_workers, "Worker pool started");

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Sends the shutdown signal and waits for workers to finish their
    /// current jobs within the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Ignore send error, workers may have already stopped.
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        match tokio::time::timeout(self.shutdown_timeout, shutdown_future).await {
            Ok(()) => {
                self.is_running.store(false, Ordering::SeqCst);
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => {
                self.is_running.store(false, Ordering::SeqCst);
                Err(PoolError::ShutdownTimeout(self.shutdown_timeout))
            }
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.num_workers)
    }

    /// Returns whether the pool is currently running.
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    /// Returns the number of workers in the pool.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Returns a reference to the job queue.
    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }
}

/// A single worker processing jobs from the queue.
struct Worker {
    id: String,
    queue: Arc<JobQueue>,
    executor: Arc<CorrectionExecutor>,
    shutdown_rx: broadcast::Receiver<()>,
    poll_interval: Duration,
    job_timeout: Duration,
    stats: Arc<SharedPoolStats>,
}

impl Worker {
    /// Main worker loop: poll, process, repeat until shutdown.
    async fn run(mut self) {
        info!(worker_id = %self.id, "Worker started");

        loop {
            match self.shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => {
                    continue;
                }
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            match self.queue.dequeue(self.poll_interval).await {
                Ok(Some(job)) => {
                    self.process_job(job).await;
                }
                Ok(None) => {
                    // The dequeue already waited poll_interval.
                    debug!(worker_id = %self.id, "No jobs available");
                }
                Err(e) => {
                    error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Processes a single job.
    async fn process_job(&self, job: CorrectionJob) {
        let start_time = Instant::now();

        info!(
            worker_id = %self.id,
            job_id = %job.id,
            essay_id = %job.essay_id,
            attempt = job.attempt,
            "Processing job"
        );

        self.stats.increment_active();
        let result = tokio::time::timeout(self.job_timeout, self.executor.execute(&job)).await;
        let duration = start_time.elapsed();
        self.stats.decrement_active();

        match result {
            Ok(Ok(outcome)) => {
                self.stats.record_outcome(outcome, duration);

                if let Err(e) = self.queue.ack(job.id).await {
                    error!(
                        worker_id = %self.id,
                        job_id = %job.id,
                        error = %e,
                        "Failed to ack job"
                    );
                }

                debug!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    outcome = ?outcome,
                    duration_ms = duration.as_millis() as u64,
                    "Job processed"
                );
            }
            Ok(Err(e)) => {
                // Store/queue infrastructure failure: the job itself may be
                // fine. Leave it in the processing queue; startup recovery
                // or the next run will pick it up.
                self.stats.record_outcome(JobOutcome::Discarded, duration);
                error!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    error = %e,
                    "Job execution hit an infrastructure error, leaving for recovery"
                );
            }
            Err(_) => {
                // The whole job exceeded its wall-clock budget. The essay is
                // left in `correcting`; the reconciliation sweep resets it.
                self.stats.record_outcome(JobOutcome::Discarded, duration);
                error!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    timeout_secs = self.job_timeout.as_secs(),
                    "Job exceeded its timeout budget"
                );

                if let Err(e) = self.queue.ack(job.id).await {
                    error!(
                        worker_id = %self.id,
                        job_id = %job.id,
                        error = %e,
                        "Failed to ack timed-out job"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_stats_default() {
        let stats = PoolStats::default();

        assert_eq!(stats.num_workers, 0);
        assert_eq!(stats.total_processed(), 0);
        assert!((stats.completion_rate() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_pool_stats_calculations() {
        let stats = PoolStats {
            num_workers: 4,
            active_workers: 2,
            jobs_completed: 70,
            jobs_failed: 10,
            jobs_discarded: 15,
            jobs_requeued: 5,
            average_job_duration: Duration::from_secs(3),
        };

        assert_eq!(stats.total_processed(), 100);
        assert!((stats.completion_rate() - 70.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_shared_pool_stats() {
        let stats = SharedPoolStats::new();

        stats.record_outcome(JobOutcome::Completed, Duration::from_secs(10));
        stats.record_outcome(JobOutcome::Completed, Duration::from_secs(20));
        stats.record_outcome(JobOutcome::Failed, Duration::from_secs(5));
        stats.record_outcome(JobOutcome::Discarded, Duration::from_millis(1));

        let pool_stats = stats.to_pool_stats(4);

        assert_eq!(pool_stats.num_workers, 4);
        assert_eq!(pool_stats.jobs_completed, 2);
        assert_eq!(pool_stats.jobs_failed, 1);
        assert_eq!(pool_stats.jobs_discarded, 1);
        assert_eq!(pool_stats.total_processed(), 4);
    }

    #[test]
    fn test_shared_pool_stats_active_workers() {
        let stats = SharedPoolStats::new();

        assert_eq!(stats.active_workers.load(Ordering::SeqCst), 0);

        stats.increment_active();
        stats.increment_active();
        assert_eq!(stats.active_workers.load(Ordering::SeqCst), 2);

        stats.decrement_active();
        assert_eq!(stats.active_workers.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::AlreadyRunning;
        assert!(err.to_string().contains("already running"));

        let err = PoolError::NotRunning;
        assert!(err.to_string().contains("not running"));

        let err = PoolError::ShutdownTimeout(Duration::from_secs(60));
        assert!(err.to_string().contains("60"));
    }
}
