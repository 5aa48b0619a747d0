//! Submission intake.
//!
//! The synchronous front door of the pipeline: validate the submission,
//! persist the essay as `pending`, enqueue the first correction job, and
//! return immediately. Grading happens later on the worker pool; the caller
//! polls status by essay id.

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::SubmitError;
use crate::model::{Essay, EssayStatus, SourceType};
use crate::notify::StatusNotifier;
use crate::scheduler::{CorrectionJob, JobQueue};
use crate::store::{EssayStore, StoreError};

/// Maximum accepted title length in characters.
pub const MAX_TITLE_CHARS: usize = 256;

/// Errors raised by intake.
#[derive(Debug, Error)]
pub enum IntakeError {
    /// The submission itself was invalid.
    #[error(transparent)]
    Invalid(#[from] SubmitError),

    /// The essay could not be persisted. The submission did not happen.
    #[error("Failed to persist submission: {0}")]
    Store(#[from] StoreError),
}

/// Receipt returned to the caller after a successful submission.
#[derive(Debug, Clone)]
pub struct SubmitReceipt {
    /// Id to poll status with.
    pub essay_id: Uuid,
    /// Dispatch generation the first job was issued under.
    pub task_id: Uuid,
}

/// Accepts essay submissions and dispatches the first correction job.
pub struct EssayIntake {
    store: Arc<EssayStore>,
    queue: Arc<JobQueue>,
    notifier: Arc<dyn StatusNotifier>,
    max_attempts: u32,
}

impl EssayIntake {
    /// Creates a new intake front end.
    pub fn new(
        store: Arc<EssayStore>,
        queue: Arc<JobQueue>,
        notifier: Arc<dyn StatusNotifier>,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            queue,
            notifier,
            max_attempts,
        }
    }

    /// Validates and accepts a submission.
    ///
    /// The database write is the commit point: once the essay row exists as
    /// `pending`, the submission succeeded even if the enqueue below fails,
    /// because the reconciliation sweep re-dispatches stuck pending essays.
    pub async fn submit(
        &self,
        title: &str,
        content: &str,
        source_type: &str,
    ) -> Result<SubmitReceipt, IntakeError> {
        let source_type = validate_submission(title, content, source_type)?;

        let essay = Essay::new(title.trim(), content, source_type);
        self.store.insert_essay(&essay).await?;
        self.notifier
            .status_changed(essay.id, EssayStatus::Pending, None)
            .await;

        let job = CorrectionJob::new(essay.id, essay.task_id).with_max_attempts(self.max_attempts);

        // Enqueue failure is tolerated: the essay is already durable and the
        // sweep will dispatch it.
        if let Err(e) = self.queue.enqueue(&job).await {
            warn!(
                essay_id = %essay.id,
                error = %e,
                "Enqueue failed after persist; sweep will re-dispatch"
            );
        }

        info!(
            essay_id = %essay.id,
            task_id = %essay.task_id,
            source_type = %essay.source_type,
            word_count = essay.word_count,
            "Essay accepted"
        );

        Ok(SubmitReceipt {
            essay_id: essay.id,
            task_id: essay.task_id,
        })
    }
}

/// Validates a raw submission. Pure; returns the parsed source type.
pub fn validate_submission(
    title: &str,
    content: &str,
    source_type: &str,
) -> Result<SourceType, SubmitError> {
    if content.trim().is_empty() {
        return Err(SubmitError::EmptyContent);
    }

    let title = title.trim();
    if title.is_empty() {
        return Err(SubmitError::EmptyTitle);
    }

    let title_chars = title.chars().count();
    if title_chars > MAX_TITLE_CHARS {
        return Err(SubmitError::TitleTooLong {
            len: title_chars,
            max: MAX_TITLE_CHARS,
        });
    }

    SourceType::parse(source_type)
        .ok_or_else(|| SubmitError::InvalidSourceType(source_type.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_known_source_types() {
        for source in ["text", "upload", "paste", "api"] {
            assert!(validate_submission("题目", "内容", source).is_ok());
        }
    }

    #[test]
    fn test_validate_rejects_unknown_source_type() {
        let err = validate_submission("题目", "内容", "docx").unwrap_err();
        assert!(matches!(err, SubmitError::InvalidSourceType(_)));

        // Case-sensitive closed set, never coerced.
        let err = validate_submission("题目", "内容", "Text").unwrap_err();
        assert!(matches!(err, SubmitError::InvalidSourceType(_)));
    }

    #[test]
    fn test_validate_rejects_empty_content() {
        let err = validate_submission("题目", "   \n\t ", "text").unwrap_err();
        assert!(matches!(err, SubmitError::EmptyContent));
    }

    #[test]
    fn test_validate_rejects_empty_title() {
        let err = validate_submission("  ", "内容", "text").unwrap_err();
        assert!(matches!(err, SubmitError::EmptyTitle));
    }

    #[test]
    fn test_validate_title_length_in_chars_not_bytes() {
        // 256 CJK characters are accepted even though they exceed 256 bytes.
        let title = "字".repeat(MAX_TITLE_CHARS);
        assert!(validate_submission(&title, "内容", "text").is_ok());

        let too_long = "字".repeat(MAX_TITLE_CHARS + 1);
        let err = validate_submission(&too_long, "内容", "text").unwrap_err();
        assert!(matches!(
            err,
            SubmitError::TitleTooLong { len, max } if len == MAX_TITLE_CHARS + 1 && max == MAX_TITLE_CHARS
        ));
    }
}
