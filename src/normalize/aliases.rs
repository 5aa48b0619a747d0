//! Per-provider alias tables.
//!
//! An alias table maps canonical field names to an ordered list of candidate
//! raw-field names. The normalizer tries candidates in declared order and
//! takes the first present, non-null value. Adding a provider means adding a
//! table here (or loading one from JSON config) — worker logic never changes.

use serde_json::Value;

use crate::error::NormalizeError;

/// Canonical field names understood by the normalizer.
pub mod field {
    pub const TOTAL: &str = "scores.total";
    pub const CONTENT: &str = "scores.content";
    pub const LANGUAGE: &str = "scores.language";
    pub const STRUCTURE: &str = "scores.structure";
    pub const WRITING: &str = "scores.writing";
    pub const OVERALL_COMMENT: &str = "analyses.overall_comment";
    pub const CONTENT_COMMENT: &str = "analyses.dimension_comments.content";
    pub const LANGUAGE_COMMENT: &str = "analyses.dimension_comments.language";
    pub const STRUCTURE_COMMENT: &str = "analyses.dimension_comments.structure";
    pub const WRITING_COMMENT: &str = "analyses.dimension_comments.writing";
    pub const SUGGESTIONS: &str = "analyses.improvement_suggestions";
    pub const ERROR_CORRECTIONS: &str = "analyses.error_corrections";
}

/// Ordered alias table for one provider.
#[derive(Debug, Clone)]
pub struct AliasTable {
    provider: String,
    fields: Vec<(String, Vec<String>)>,
}

impl AliasTable {
    /// Creates an empty table for a provider.
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            fields: Vec::new(),
        }
    }

    /// Declares the candidate raw-field names for a canonical field.
    /// Candidates are tried in the given order.
    pub fn alias(mut self, canonical: &str, candidates: &[&str]) -> Self {
        self.fields.push((
            canonical.to_string(),
            candidates.iter().map(|s| s.to_string()).collect(),
        ));
        self
    }

    /// Returns the candidate list for a canonical field, empty if undeclared.
    pub fn candidates(&self, canonical: &str) -> &[String] {
        self.fields
            .iter()
            .find(|(name, _)| name == canonical)
            .map(|(_, candidates)| candidates.as_slice())
            .unwrap_or(&[])
    }

    /// Returns the provider this table belongs to.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Loads a table from a JSON object of the form
    /// `{ "scores.total": ["总分", "score"], ... }`.
    pub fn from_json(provider: impl Into<String>, value: &Value) -> Result<Self, NormalizeError> {
        let provider = provider.into();
        let obj = value
            .as_object()
            .ok_or_else(|| NormalizeError::InvalidAliasTable {
                provider: provider.clone(),
                message: "alias table must be a JSON object".to_string(),
            })?;

        let mut table = AliasTable::new(provider.clone());
        for (canonical, candidates) in obj {
            let list = candidates
                .as_array()
                .ok_or_else(|| NormalizeError::InvalidAliasTable {
                    provider: provider.clone(),
                    message: format!("candidates for '{}' must be an array", canonical),
                })?;

            let mut names = Vec::with_capacity(list.len());
            for entry in list {
                match entry.as_str() {
                    Some(s) if !s.is_empty() => names.push(s.to_string()),
                    _ => {
                        return Err(NormalizeError::InvalidAliasTable {
                            provider: provider.clone(),
                            message: format!(
                                "candidates for '{}' must be non-empty strings",
                                canonical
                            ),
                        })
                    }
                }
            }
            table.fields.push((canonical.clone(), names));
        }

        Ok(table)
    }

    /// Returns the built-in table for a provider, falling back to the
    /// English-keyed table for providers without a dedicated one.
    pub fn for_provider(provider: &str) -> Self {
        match provider {
            "deepseek" => deepseek_table(),
            "openai" | "synthetic" => english_table(provider),
            other => english_table(other),
        }
    }
}

/// Table for DeepSeek-style responses with Chinese field names.
fn deepseek_table() -> AliasTable {
    AliasTable::new("deepseek")
        .alias(field::TOTAL, &["总分", "总评分", "total_score", "score"])
        .alias(field::CONTENT, &["内容分", "内容得分", "content_score"])
        .alias(field::LANGUAGE, &["语言分", "语言得分", "language_score"])
        .alias(field::STRUCTURE, &["结构分", "结构得分", "structure_score"])
        .alias(
            field::WRITING,
            &["书写分", "卷面分", "书写得分", "writing_score"],
        )
        .alias(
            field::OVERALL_COMMENT,
            &["总评", "总体评价", "overall_comment"],
        )
        .alias(field::CONTENT_COMMENT, &["内容点评", "内容评价"])
        .alias(field::LANGUAGE_COMMENT, &["语言点评", "语言评价"])
        .alias(field::STRUCTURE_COMMENT, &["结构点评", "结构评价"])
        .alias(field::WRITING_COMMENT, &["书写点评", "卷面点评"])
        .alias(
            field::SUGGESTIONS,
            &["改进建议", "提升建议", "建议", "suggestions"],
        )
        .alias(
            field::ERROR_CORRECTIONS,
            &["病句修改", "错误修改", "corrections"],
        )
}

/// Table for English-keyed responses (OpenAI-style and synthetic backends).
fn english_table(provider: &str) -> AliasTable {
    AliasTable::new(provider)
        .alias(field::TOTAL, &["total_score", "total", "overall_score", "score"])
        .alias(field::CONTENT, &["content_score"])
        .alias(field::LANGUAGE, &["language_score"])
        .alias(field::STRUCTURE, &["structure_score", "organization_score"])
        .alias(field::WRITING, &["writing_score", "mechanics_score"])
        .alias(
            field::OVERALL_COMMENT,
            &["overall_comment", "summary", "general_feedback"],
        )
        .alias(field::CONTENT_COMMENT, &["content_comment", "content_feedback"])
        .alias(
            field::LANGUAGE_COMMENT,
            &["language_comment", "language_feedback"],
        )
        .alias(
            field::STRUCTURE_COMMENT,
            &["structure_comment", "structure_feedback"],
        )
        .alias(field::WRITING_COMMENT, &["writing_comment", "writing_feedback"])
        .alias(
            field::SUGGESTIONS,
            &["improvement_suggestions", "suggestions"],
        )
        .alias(field::ERROR_CORRECTIONS, &["error_corrections", "corrections"])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_candidates_preserve_declared_order() {
        let table = AliasTable::for_provider("deepseek");
        let candidates = table.candidates(field::TOTAL);

        assert_eq!(candidates[0], "总分");
        assert!(candidates.contains(&"score".to_string()));
    }

    #[test]
    fn test_undeclared_field_has_no_candidates() {
        let table = AliasTable::new("empty");
        assert!(table.candidates(field::TOTAL).is_empty());
    }

    #[test]
    fn test_unknown_provider_falls_back_to_english() {
        let table = AliasTable::for_provider("some-new-vendor");
        assert_eq!(table.provider(), "some-new-vendor");
        assert_eq!(table.candidates(field::TOTAL)[0], "total_score");
    }

    #[test]
    fn test_from_json() {
        let source = json!({
            "scores.total": ["评分", "score"],
            "analyses.overall_comment": ["点评"]
        });
        let table = AliasTable::from_json("custom", &source).expect("valid table");

        assert_eq!(table.candidates(field::TOTAL), &["评分", "score"]);
        assert_eq!(table.candidates(field::OVERALL_COMMENT), &["点评"]);
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        let err = AliasTable::from_json("custom", &json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("custom"));
    }

    #[test]
    fn test_from_json_rejects_non_string_candidates() {
        let source = json!({ "scores.total": [42] });
        assert!(AliasTable::from_json("custom", &source).is_err());
    }
}
