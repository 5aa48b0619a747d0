//! Essay entity and its status lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Status of an essay in the correction pipeline.
///
/// Transitions: `pending → correcting → {completed | failed}`. The
/// reconciliation sweep may reset `correcting → pending` (stuck job) and an
/// operator may re-queue `failed → pending`. `completed` is terminal except
/// for an explicit superseding re-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EssayStatus {
    Pending,
    Correcting,
    Completed,
    Failed,
}

impl EssayStatus {
    /// Returns the database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EssayStatus::Pending => "pending",
            EssayStatus::Correcting => "correcting",
            EssayStatus::Completed => "completed",
            EssayStatus::Failed => "failed",
        }
    }

    /// Parses a stored status value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(EssayStatus::Pending),
            "correcting" => Some(EssayStatus::Correcting),
            "completed" => Some(EssayStatus::Completed),
            "failed" => Some(EssayStatus::Failed),
            _ => None,
        }
    }

    /// Returns whether the status is terminal for worker purposes.
    ///
    /// A job targeting a terminal essay is a redelivery no-op.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EssayStatus::Completed | EssayStatus::Failed)
    }
}

impl std::fmt::Display for EssayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an essay entered the system. Closed set: unknown values are rejected
/// at the intake boundary, never coerced to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Text,
    Upload,
    Paste,
    Api,
}

impl SourceType {
    /// Returns the database/wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Text => "text",
            SourceType::Upload => "upload",
            SourceType::Paste => "paste",
            SourceType::Api => "api",
        }
    }

    /// Parses a source type string. Returns `None` for anything outside the
    /// closed set; the caller decides how to surface the rejection.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(SourceType::Text),
            "upload" => Some(SourceType::Upload),
            "paste" => Some(SourceType::Paste),
            "api" => Some(SourceType::Api),
            _ => None,
        }
    }
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submitted essay.
///
/// Content is immutable after creation; only the state machine mutates
/// `status`, and only dispatch mutates `task_id` (a new dispatch attempt
/// issues a new `task_id`, invalidating jobs carrying the old one).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Essay {
    /// Unique identifier.
    pub id: Uuid,
    /// Essay title.
    pub title: String,
    /// Full essay text.
    pub content: String,
    /// Unicode non-whitespace character count. CJK essays are measured by
    /// character, so this is a char count rather than a word split.
    pub word_count: i32,
    /// Current lifecycle status.
    pub status: EssayStatus,
    /// How the essay entered the system.
    pub source_type: SourceType,
    /// Handle of the current dispatch generation.
    pub task_id: Uuid,
    /// When the essay was created.
    pub created_at: DateTime<Utc>,
    /// When the essay was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl Essay {
    /// Creates a new pending essay with a fresh dispatch handle.
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        let title = title.into();
        let content = content.into();
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            word_count: count_chars(&content),
            title,
            content,
            status: EssayStatus::Pending,
            source_type,
            task_id: Uuid::new_v4(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Counts non-whitespace characters.
pub fn count_chars(content: &str) -> i32 {
    content.chars().filter(|c| !c.is_whitespace()).count() as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for status in [
            EssayStatus::Pending,
            EssayStatus::Correcting,
            EssayStatus::Completed,
            EssayStatus::Failed,
        ] {
            assert_eq!(EssayStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EssayStatus::parse("reviewing"), None);
    }

    #[test]
    fn test_status_terminal() {
        assert!(!EssayStatus::Pending.is_terminal());
        assert!(!EssayStatus::Correcting.is_terminal());
        assert!(EssayStatus::Completed.is_terminal());
        assert!(EssayStatus::Failed.is_terminal());
    }

    #[test]
    fn test_source_type_closed_set() {
        assert_eq!(SourceType::parse("text"), Some(SourceType::Text));
        assert_eq!(SourceType::parse("upload"), Some(SourceType::Upload));
        assert_eq!(SourceType::parse("paste"), Some(SourceType::Paste));
        assert_eq!(SourceType::parse("api"), Some(SourceType::Api));

        // Unknown values are rejected, never defaulted
        assert_eq!(SourceType::parse("TEXT"), None);
        assert_eq!(SourceType::parse("docx"), None);
        assert_eq!(SourceType::parse(""), None);
    }

    #[test]
    fn test_essay_new_is_pending() {
        let essay = Essay::new("题目", "这是一篇作文", SourceType::Text);

        assert_eq!(essay.status, EssayStatus::Pending);
        assert!(!essay.id.is_nil());
        assert!(!essay.task_id.is_nil());
        assert_eq!(essay.word_count, 6);
    }

    #[test]
    fn test_count_chars_ignores_whitespace() {
        assert_eq!(count_chars("你好 世界\n再见"), 6);
        assert_eq!(count_chars("  \n\t "), 0);
        assert_eq!(count_chars("abc def"), 6);
    }

    #[test]
    fn test_essay_serialization() {
        let essay = Essay::new("Title", "Content here", SourceType::Api);
        let json = serde_json::to_string(&essay).expect("serialization should work");

        assert!(json.contains("\"status\":\"pending\""));
        assert!(json.contains("\"source_type\":\"api\""));

        let parsed: Essay = serde_json::from_str(&json).expect("deserialization should work");
        assert_eq!(parsed.id, essay.id);
        assert_eq!(parsed.task_id, essay.task_id);
    }
}
