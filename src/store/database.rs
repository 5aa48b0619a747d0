//! PostgreSQL store: the status state machine and consistency guard.
//!
//! All authoritative pipeline state lives here. Workers coordinate
//! exclusively through guarded compare-and-swap updates on `essays.status`
//! and through `commit_completed`, whose `SELECT ... FOR UPDATE` on the
//! essay row is the per-essay serialization point. There is no in-process
//! shared state: workers may run on different hosts.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{
    CanonicalResult, Correction, CorrectionKind, CorrectionStatus, Essay, EssayStatus, SourceType,
};

use super::migrations::{MigrationError, MigrationRunner};

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Connection to the database failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Query execution failed.
    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),

    /// Record not found.
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value could not be decoded into a domain type.
    #[error("Corrupt row: {0}")]
    Corrupt(String),

    /// Two commits raced for one essay; the losing commit is rejected,
    /// never merged.
    #[error("Consistency violation for essay {essay_id}: {reason}")]
    ConsistencyViolation { essay_id: Uuid, reason: String },

    /// Migration error.
    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),
}

/// Status report returned to the web layer.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub essay_id: Uuid,
    pub status: EssayStatus,
    pub score: Option<f64>,
    pub result: Option<CanonicalResult>,
    pub error: Option<String>,
}

/// PostgreSQL-backed essay/correction store.
pub struct EssayStore {
    pool: PgPool,
}

impl EssayStore {
    /// Connects to the database and returns a new store.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect(database_url)
            .await
            .map_err(|e| StoreError::ConnectionFailed(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Creates a store from an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs database migrations.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let runner = MigrationRunner::new(self.pool.clone());
        runner.run_migrations().await?;
        Ok(())
    }

    // =========================================================================
    // Essay operations
    // =========================================================================

    /// Persists a new essay.
    pub async fn insert_essay(&self, essay: &Essay) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO essays (
                id, title, content, word_count, status, source_type,
                task_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(essay.id)
        .bind(&essay.title)
        .bind(&essay.content)
        .bind(essay.word_count)
        .bind(essay.status.as_str())
        .bind(essay.source_type.as_str())
        .bind(essay.task_id)
        .bind(essay.created_at)
        .bind(essay.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Retrieves an essay by id. Returns `None` if it does not exist.
    pub async fn get_essay(&self, id: Uuid) -> Result<Option<Essay>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, title, content, word_count, status, source_type,
                   task_id, created_at, updated_at
            FROM essays
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| row_to_essay(&r)).transpose()
    }

    /// Guarded transition `pending → correcting`.
    ///
    /// Succeeds only when the essay is still pending AND the job's task_id
    /// matches the current dispatch generation. Returns whether the claim
    /// was won; losing it means the job is stale or already claimed.
    pub async fn begin_correcting(&self, essay_id: Uuid, task_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE essays
            SET status = 'correcting', updated_at = NOW()
            WHERE id = $1 AND status = 'pending' AND task_id = $2
            "#,
        )
        .bind(essay_id)
        .bind(task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Guarded transition `correcting → pending` with a fresh dispatch
    /// generation, used for task-level retry. The old task_id is part of the
    /// guard so a concurrent reset cannot double-fire.
    pub async fn requeue_for_retry(
        &self,
        essay_id: Uuid,
        old_task_id: Uuid,
        new_task_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE essays
            SET status = 'pending', task_id = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'correcting' AND task_id = $2
            "#,
        )
        .bind(essay_id)
        .bind(old_task_id)
        .bind(new_task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Restart edge `failed → pending` (operator or sweep re-queue).
    pub async fn requeue_failed(
        &self,
        essay_id: Uuid,
        new_task_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE essays
            SET status = 'pending', task_id = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(essay_id)
        .bind(new_task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Explicit superseding re-run: `completed → pending` under a fresh
    /// dispatch generation. This is the only edge out of `completed`, and it
    /// is operator-initiated.
    ///
    /// The old completed correction row is left untouched here; it stays the
    /// authoritative result until the new attempt commits, at which point
    /// `commit_completed` marks it superseded in the same transaction.
    pub async fn rerun_completed(
        &self,
        essay_id: Uuid,
        new_task_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE essays
            SET status = 'pending', task_id = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'completed'
            "#,
        )
        .bind(essay_id)
        .bind(new_task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Refreshes the dispatch generation of a still-pending essay (lost
    /// enqueue recovery). Guarded on the old task_id.
    pub async fn redispatch_pending(
        &self,
        essay_id: Uuid,
        old_task_id: Uuid,
        new_task_id: Uuid,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE essays
            SET task_id = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'pending' AND task_id = $2
            "#,
        )
        .bind(essay_id)
        .bind(old_task_id)
        .bind(new_task_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Essays stuck in `correcting` longer than the staleness threshold
    /// (worker crash, lost message). Candidates for sweep repair.
    pub async fn stale_correcting(
        &self,
        stale_after: std::time::Duration,
    ) -> Result<Vec<Essay>, StoreError> {
        self.stuck_since("correcting", stale_after).await
    }

    /// Essays stuck in `pending` longer than the threshold (lost enqueue).
    pub async fn stuck_pending(
        &self,
        older_than: std::time::Duration,
    ) -> Result<Vec<Essay>, StoreError> {
        self.stuck_since("pending", older_than).await
    }

    async fn stuck_since(
        &self,
        status: &str,
        threshold: std::time::Duration,
    ) -> Result<Vec<Essay>, StoreError> {
        let cutoff: DateTime<Utc> = Utc::now()
            - ChronoDuration::from_std(threshold)
                .map_err(|e| StoreError::Corrupt(format!("threshold out of range: {}", e)))?;

        let rows = sqlx::query(
            r#"
            SELECT id, title, content, word_count, status, source_type,
                   task_id, created_at, updated_at
            FROM essays
            WHERE status = $1 AND updated_at < $2
            ORDER BY updated_at
            "#,
        )
        .bind(status)
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_essay).collect()
    }

    // =========================================================================
    // Correction operations
    // =========================================================================

    /// Creates a new in-flight correction attempt row.
    pub async fn create_correction(
        &self,
        essay_id: Uuid,
        attempt: i32,
    ) -> Result<Correction, StoreError> {
        let correction = Correction::processing(essay_id, attempt);

        sqlx::query(
            r#"
            INSERT INTO corrections (
                id, essay_id, kind, status, score, result,
                error_message, attempt, created_at
            ) VALUES ($1, $2, $3, $4, NULL, NULL, NULL, $5, $6)
            "#,
        )
        .bind(correction.id)
        .bind(correction.essay_id)
        .bind(correction.kind.as_str())
        .bind(correction.status.as_str())
        .bind(correction.attempt)
        .bind(correction.created_at)
        .execute(&self.pool)
        .await?;

        Ok(correction)
    }

    /// Number of AI correction attempts recorded for an essay. Used by the
    /// sweep as the global attempt budget.
    pub async fn attempts_used(&self, essay_id: Uuid) -> Result<i64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS attempts FROM corrections WHERE essay_id = $1 AND kind = 'ai'",
        )
        .bind(essay_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get("attempts")?)
    }

    /// The commit operation: the single logical unit that publishes a
    /// grading result.
    ///
    /// Inside one transaction, serialized per essay by a row lock:
    /// (a) any previously completed correction is marked superseded,
    /// (b) the current correction is marked completed with the canonical
    /// result, (c) the essay becomes completed. A concurrent commit that
    /// lost the race, or a commit from an invalidated dispatch generation,
    /// is rejected with `ConsistencyViolation`.
    pub async fn commit_completed(
        &self,
        essay_id: Uuid,
        correction_id: Uuid,
        task_id: Uuid,
        result: &CanonicalResult,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Per-essay serialization point.
        let row = sqlx::query("SELECT status, task_id FROM essays WHERE id = $1 FOR UPDATE")
            .bind(essay_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Essay {}", essay_id)))?;

        let status_raw: String = row.try_get("status")?;
        let current_task: Uuid = row.try_get("task_id")?;

        if status_raw == EssayStatus::Completed.as_str() {
            return Err(StoreError::ConsistencyViolation {
                essay_id,
                reason: "essay already has an authoritative completed result".to_string(),
            });
        }
        if current_task != task_id {
            return Err(StoreError::ConsistencyViolation {
                essay_id,
                reason: "dispatch generation was invalidated by a newer attempt".to_string(),
            });
        }

        // Supersede, never delete: audit history stays intact and the
        // partial unique index stays satisfiable.
        sqlx::query(
            r#"
            UPDATE corrections
            SET status = 'superseded'
            WHERE essay_id = $1 AND status = 'completed'
            "#,
        )
        .bind(essay_id)
        .execute(&mut *tx)
        .await?;

        let result_json = serde_json::to_value(result)?;
        sqlx::query(
            r#"
            UPDATE corrections
            SET status = 'completed', score = $2, result = $3
            WHERE id = $1
            "#,
        )
        .bind(correction_id)
        .bind(result.scores.total)
        .bind(&result_json)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE essays SET status = 'completed', updated_at = NOW() WHERE id = $1")
            .bind(essay_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// The fail operation: marks a correction attempt failed and the essay
    /// failed, unless the essay already completed.
    ///
    /// Returns whether the failure was applied. A stale failure arriving
    /// after a successful commit is ignored rather than allowed to regress
    /// status.
    pub async fn mark_failed(
        &self,
        essay_id: Uuid,
        correction_id: Uuid,
        message: &str,
    ) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM essays WHERE id = $1 FOR UPDATE")
            .bind(essay_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Essay {}", essay_id)))?;

        let status_raw: String = row.try_get("status")?;
        if status_raw == EssayStatus::Completed.as_str() {
            return Ok(false);
        }

        sqlx::query(
            "UPDATE corrections SET status = 'failed', error_message = $2 WHERE id = $1",
        )
        .bind(correction_id)
        .bind(message)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE essays SET status = 'failed', updated_at = NOW() WHERE id = $1")
            .bind(essay_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// Records a transient attempt failure on the correction row without
    /// failing the essay. Used before a task-level retry.
    pub async fn fail_correction_row(
        &self,
        correction_id: Uuid,
        message: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE corrections SET status = 'failed', error_message = $2 WHERE id = $1",
        )
        .bind(correction_id)
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Fails an orphaned essay whose attempt budget is exhausted, closing
    /// any still-processing correction rows. Guarded against completed.
    pub async fn fail_stuck(&self, essay_id: Uuid, message: &str) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM essays WHERE id = $1 FOR UPDATE")
            .bind(essay_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("Essay {}", essay_id)))?;

        let status_raw: String = row.try_get("status")?;
        if status_raw == EssayStatus::Completed.as_str() {
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE corrections
            SET status = 'failed', error_message = $2
            WHERE essay_id = $1 AND status IN ('pending', 'processing')
            "#,
        )
        .bind(essay_id)
        .bind(message)
        .execute(&mut *tx)
        .await?;

        sqlx::query("UPDATE essays SET status = 'failed', updated_at = NOW() WHERE id = $1")
            .bind(essay_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    // =========================================================================
    // Status query interface
    // =========================================================================

    /// Status report for the web layer: current status plus the
    /// authoritative result or the latest failure message.
    pub async fn get_status(&self, essay_id: Uuid) -> Result<Option<StatusReport>, StoreError> {
        let essay = match self.get_essay(essay_id).await? {
            Some(essay) => essay,
            None => return Ok(None),
        };

        let mut report = StatusReport {
            essay_id,
            status: essay.status,
            score: None,
            result: None,
            error: None,
        };

        match essay.status {
            EssayStatus::Completed => {
                let row = sqlx::query(
                    r#"
                    SELECT score, result FROM corrections
                    WHERE essay_id = $1 AND status = 'completed'
                    "#,
                )
                .bind(essay_id)
                .fetch_optional(&self.pool)
                .await?;

                if let Some(row) = row {
                    report.score = row.try_get("score")?;
                    let result_json: Option<serde_json::Value> = row.try_get("result")?;
                    report.result = result_json.map(serde_json::from_value).transpose()?;
                }
            }
            EssayStatus::Failed => {
                let row = sqlx::query(
                    r#"
                    SELECT error_message FROM corrections
                    WHERE essay_id = $1 AND status = 'failed'
                    ORDER BY created_at DESC
                    LIMIT 1
                    "#,
                )
                .bind(essay_id)
                .fetch_optional(&self.pool)
                .await?;

                if let Some(row) = row {
                    report.error = row.try_get("error_message")?;
                }
            }
            _ => {}
        }

        Ok(Some(report))
    }

    /// Correction history for an essay, newest first.
    pub async fn list_corrections(&self, essay_id: Uuid) -> Result<Vec<Correction>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, essay_id, kind, status, score, result,
                   error_message, attempt, created_at
            FROM corrections
            WHERE essay_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(essay_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_correction).collect()
    }
}

fn row_to_essay(row: &sqlx::postgres::PgRow) -> Result<Essay, StoreError> {
    let status_raw: String = row.try_get("status")?;
    let status = EssayStatus::parse(&status_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown essay status '{}'", status_raw)))?;

    let source_raw: String = row.try_get("source_type")?;
    let source_type = SourceType::parse(&source_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown source type '{}'", source_raw)))?;

    Ok(Essay {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        content: row.try_get("content")?,
        word_count: row.try_get("word_count")?,
        status,
        source_type,
        task_id: row.try_get("task_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_correction(row: &sqlx::postgres::PgRow) -> Result<Correction, StoreError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = CorrectionKind::parse(&kind_raw)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown correction kind '{}'", kind_raw)))?;

    let status_raw: String = row.try_get("status")?;
    let status = CorrectionStatus::parse(&status_raw).ok_or_else(|| {
        StoreError::Corrupt(format!("unknown correction status '{}'", status_raw))
    })?;

    let result_json: Option<serde_json::Value> = row.try_get("result")?;
    let result = result_json.map(serde_json::from_value).transpose()?;

    Ok(Correction {
        id: row.try_get("id")?,
        essay_id: row.try_get("essay_id")?,
        kind,
        status,
        score: row.try_get("score")?,
        result,
        error_message: row.try_get("error_message")?,
        attempt: row.try_get("attempt")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        let essay_id = Uuid::new_v4();
        let err = StoreError::ConsistencyViolation {
            essay_id,
            reason: "essay already has an authoritative completed result".to_string(),
        };
        assert!(err.to_string().contains(&essay_id.to_string()));
        assert!(err.to_string().contains("authoritative"));

        let err = StoreError::NotFound("Essay abc".to_string());
        assert!(err.to_string().contains("Essay abc"));
    }

    #[test]
    fn test_status_report_defaults() {
        let report = StatusReport {
            essay_id: Uuid::new_v4(),
            status: EssayStatus::Pending,
            score: None,
            result: None,
            error: None,
        };

        assert_eq!(report.status, EssayStatus::Pending);
        assert!(report.result.is_none());
        assert!(report.error.is_none());
    }
}
