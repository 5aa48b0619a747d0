//! Correction entity: one grading attempt for an essay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::canonical::CanonicalResult;

/// Whether a correction was produced by the AI pipeline or entered manually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    Ai,
    Manual,
}

impl CorrectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionKind::Ai => "ai",
            CorrectionKind::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ai" => Some(CorrectionKind::Ai),
            "manual" => Some(CorrectionKind::Manual),
            _ => None,
        }
    }
}

/// Status of a single correction attempt.
///
/// `superseded` is a first-class status: when a re-run commits a newer
/// result, the old completed row is flipped to `superseded` instead of being
/// deleted. Keeping `completed` exclusive lets a partial unique index on
/// `(essay_id) WHERE status = 'completed'` enforce the at-most-one-completed
/// invariant structurally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Superseded,
}

impl CorrectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionStatus::Pending => "pending",
            CorrectionStatus::Processing => "processing",
            CorrectionStatus::Completed => "completed",
            CorrectionStatus::Failed => "failed",
            CorrectionStatus::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(CorrectionStatus::Pending),
            "processing" => Some(CorrectionStatus::Processing),
            "completed" => Some(CorrectionStatus::Completed),
            "failed" => Some(CorrectionStatus::Failed),
            "superseded" => Some(CorrectionStatus::Superseded),
            _ => None,
        }
    }
}

impl std::fmt::Display for CorrectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One grading attempt for an essay.
///
/// Rows are created by the worker at dispatch time and mutated only through
/// the store's commit/fail operations. They are never deleted; superseded
/// rows preserve audit history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    /// Unique identifier.
    pub id: Uuid,
    /// Owning essay.
    pub essay_id: Uuid,
    /// AI-produced or manual.
    pub kind: CorrectionKind,
    /// Attempt lifecycle status.
    pub status: CorrectionStatus,
    /// Total score, populated on completion.
    pub score: Option<f64>,
    /// Canonical scoring/analysis result, populated on completion.
    pub result: Option<CanonicalResult>,
    /// Human-readable failure message, populated on failure.
    pub error_message: Option<String>,
    /// Which dispatch attempt produced this row (1-based).
    pub attempt: i32,
    /// When the attempt started.
    pub created_at: DateTime<Utc>,
}

impl Correction {
    /// Creates a new in-flight AI correction attempt.
    pub fn processing(essay_id: Uuid, attempt: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            essay_id,
            kind: CorrectionKind::Ai,
            status: CorrectionStatus::Processing,
            score: None,
            result: None,
            error_message: None,
            attempt,
            created_at: Utc::now(),
        }
    }
}
