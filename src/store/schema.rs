//! SQL schema definitions for the correction pipeline.
//!
//! All statements are idempotent (IF NOT EXISTS) so the migration runner can
//! be re-run safely.

/// Essays table: one row per submission.
pub const CREATE_ESSAYS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS essays (
    id UUID PRIMARY KEY,
    title TEXT NOT NULL,
    content TEXT NOT NULL,
    word_count INTEGER NOT NULL,
    status VARCHAR(16) NOT NULL,
    source_type VARCHAR(16) NOT NULL,
    task_id UUID NOT NULL,
    created_at TIMESTAMPTZ NOT NULL,
    updated_at TIMESTAMPTZ NOT NULL
)
"#;

/// Index supporting the reconciliation sweep's staleness scans.
pub const CREATE_ESSAYS_STATUS_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_essays_status_updated
ON essays (status, updated_at)
"#;

/// Corrections table: one row per grading attempt, never deleted.
pub const CREATE_CORRECTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS corrections (
    id UUID PRIMARY KEY,
    essay_id UUID NOT NULL REFERENCES essays(id),
    kind VARCHAR(16) NOT NULL,
    status VARCHAR(16) NOT NULL,
    score DOUBLE PRECISION,
    result JSONB,
    error_message TEXT,
    attempt INTEGER NOT NULL,
    created_at TIMESTAMPTZ NOT NULL
)
"#;

/// Structural enforcement of the core consistency contract: at most one
/// completed correction per essay. Superseded rows leave the index.
pub const CREATE_COMPLETED_UNIQUE_INDEX: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS uniq_corrections_completed
ON corrections (essay_id)
WHERE status = 'completed'
"#;

/// Index for per-essay correction history lookups.
pub const CREATE_CORRECTIONS_ESSAY_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_corrections_essay
ON corrections (essay_id, created_at)
"#;

/// Returns all schema statements in creation order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_ESSAYS_TABLE,
        CREATE_ESSAYS_STATUS_INDEX,
        CREATE_CORRECTIONS_TABLE,
        CREATE_COMPLETED_UNIQUE_INDEX,
        CREATE_CORRECTIONS_ESSAY_INDEX,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_statement_order() {
        let statements = all_schema_statements();
        assert_eq!(statements.len(), 5);
        // Corrections reference essays, so essays must come first.
        assert!(statements[0].contains("essays"));
        assert!(statements[2].contains("corrections"));
    }

    #[test]
    fn test_completed_index_is_partial_and_unique() {
        assert!(CREATE_COMPLETED_UNIQUE_INDEX.contains("UNIQUE"));
        assert!(CREATE_COMPLETED_UNIQUE_INDEX.contains("WHERE status = 'completed'"));
    }

    #[test]
    fn test_all_statements_idempotent() {
        for statement in all_schema_statements() {
            assert!(statement.contains("IF NOT EXISTS"), "{}", statement);
        }
    }
}
