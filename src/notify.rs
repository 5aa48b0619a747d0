//! Notification boundary.
//!
//! The pipeline reports every essay status transition through
//! `StatusNotifier` and knows nothing about delivery. Deployments plug in
//! whatever transport they need (webhook, message bus); the default simply
//! writes a structured log event.

use async_trait::async_trait;
use tracing::info;
use uuid::Uuid;

use crate::model::EssayStatus;

/// Observer for essay status transitions.
///
/// Implementations must not block the pipeline: delivery failures are the
/// implementation's problem and must never propagate back into grading.
#[async_trait]
pub trait StatusNotifier: Send + Sync {
    /// Called after an essay's status changed. `error` carries the failure
    /// message on transitions to `failed`.
    async fn status_changed(&self, essay_id: Uuid, status: EssayStatus, error: Option<&str>);
}

/// Default notifier: one structured log event per transition.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StatusNotifier for LogNotifier {
    async fn status_changed(&self, essay_id: Uuid, status: EssayStatus, error: Option<&str>) {
        info!(
            essay_id = %essay_id,
            status = %status,
            error = error.unwrap_or(""),
            "Essay status changed"
        );
    }
}
