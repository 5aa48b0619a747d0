//! Task dispatch: jobs, queue, workers and the reconciliation sweep.
//!
//! The scheduler is the asynchronous backbone of the pipeline. Intake drops
//! a `CorrectionJob` on the Redis-backed `JobQueue`; the `WorkerPool` pulls
//! jobs and runs them through the `CorrectionExecutor`; the `Reaper`
//! periodically repairs anything that fell off the happy path.

pub mod executor;
pub mod job;
pub mod queue;
pub mod reaper;
pub mod worker_pool;

pub use executor::{
    preflight, should_schedule_retry, CorrectionExecutor, DispatchError, JobDisposition,
    JobOutcome,
};
pub use job::CorrectionJob;
pub use queue::{JobQueue, QueueError, QueueStats};
pub use reaper::{Reaper, SweepReport};
pub use worker_pool::{PoolError, PoolStats, WorkerPool};
