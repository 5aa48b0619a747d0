//! redink: asynchronous essay correction pipeline.
//!
//! The pipeline accepts essay submissions, dispatches correction jobs
//! through a Redis-backed queue, grades them through an AI provider
//! gateway, normalizes provider-specific responses into one canonical
//! result shape, and persists everything in PostgreSQL under a strict
//! at-most-one-completed-correction-per-essay guarantee.
//!
//! # Architecture
//!
//! - [`intake`]: synchronous submission front door
//! - [`scheduler`]: Redis job queue, worker pool, and reconciliation sweep
//! - [`gateway`]: provider abstraction with timeout and transient retry
//! - [`normalize`]: alias-table driven response normalization
//! - [`store`]: PostgreSQL state machine and consistency guard
//! - [`notify`]: status transition observer boundary

pub mod cli;
pub mod config;
pub mod error;
pub mod gateway;
pub mod intake;
pub mod model;
pub mod normalize;
pub mod notify;
pub mod scheduler;
pub mod store;

pub use config::{AppConfig, ConfigError, GatewayConfig};
pub use error::{NormalizeError, ProviderError, SubmitError};
pub use intake::{EssayIntake, IntakeError, SubmitReceipt};
pub use model::{CanonicalResult, Correction, CorrectionStatus, Essay, EssayStatus, SourceType};
pub use notify::{LogNotifier, StatusNotifier};
pub use store::{EssayStore, StatusReport, StoreError};
