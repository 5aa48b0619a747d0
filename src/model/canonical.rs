//! Canonical scoring/analysis schema, independent of AI provider.
//!
//! Every provider response is mapped into this shape by the normalizer, so
//! downstream consumers never branch on provider identity. The value object
//! is embedded in a `Correction` row as JSONB and not persisted separately.

use serde::{Deserialize, Serialize};

/// Score block. Total is required; dimension scores are optional because not
/// every provider reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scores {
    /// Overall score. The one field normalization refuses to do without.
    pub total: f64,
    #[serde(default)]
    pub content: Option<f64>,
    #[serde(default)]
    pub language: Option<f64>,
    #[serde(default)]
    pub structure: Option<f64>,
    #[serde(default)]
    pub writing: Option<f64>,
}

/// Per-dimension prose comments. Absent dimensions default to empty strings
/// rather than failing the whole result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionComments {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub structure: String,
    #[serde(default)]
    pub writing: String,
}

/// A single sentence-level correction suggested by the grader.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorCorrection {
    /// The original problematic text.
    #[serde(default)]
    pub original: String,
    /// The suggested replacement.
    #[serde(default)]
    pub corrected: String,
    /// Why the change was suggested.
    #[serde(default)]
    pub explanation: String,
}

/// Analysis block: prose feedback accompanying the scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analyses {
    #[serde(default)]
    pub overall_comment: String,
    #[serde(default)]
    pub dimension_comments: DimensionComments,
    #[serde(default)]
    pub improvement_suggestions: Vec<String>,
    #[serde(default)]
    pub error_corrections: Vec<ErrorCorrection>,
}

/// Provenance metadata for a canonical result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultMeta {
    /// Provider identifier (e.g. "deepseek", "synthetic").
    pub provider: String,
    /// Model version reported by the provider.
    #[serde(default)]
    pub model_version: String,
    /// Wall-clock time of the provider call in milliseconds.
    #[serde(default)]
    pub processing_time_ms: u64,
    /// True when the result was fabricated in degraded mode (no credentials).
    /// Consumers must be able to tell real grades from synthetic ones.
    #[serde(default)]
    pub synthetic: bool,
}

/// The single normalized scoring/analysis result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalResult {
    pub scores: Scores,
    #[serde(default)]
    pub analyses: Analyses,
    pub metadata: ResultMeta,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_result_roundtrip() {
        let result = CanonicalResult {
            scores: Scores {
                total: 42.0,
                content: Some(12.0),
                language: None,
                structure: Some(9.5),
                writing: None,
            },
            analyses: Analyses {
                overall_comment: "结构清晰".to_string(),
                dimension_comments: DimensionComments {
                    content: "内容充实".to_string(),
                    ..Default::default()
                },
                improvement_suggestions: vec!["多用成语".to_string()],
                error_corrections: vec![ErrorCorrection {
                    original: "我非常很高兴".to_string(),
                    corrected: "我非常高兴".to_string(),
                    explanation: "重复修饰".to_string(),
                }],
            },
            metadata: ResultMeta {
                provider: "deepseek".to_string(),
                model_version: "deepseek-chat".to_string(),
                processing_time_ms: 1234,
                synthetic: false,
            },
        };

        let json = serde_json::to_string(&result).expect("serialization should work");
        let parsed: CanonicalResult =
            serde_json::from_str(&json).expect("deserialization should work");

        assert_eq!(parsed, result);
    }

    #[test]
    fn test_optional_blocks_default() {
        // A minimal persisted result with only scores and metadata must parse.
        let json = r#"{"scores":{"total":40.0},"metadata":{"provider":"openai"}}"#;
        let parsed: CanonicalResult = serde_json::from_str(json).expect("should parse");

        assert_eq!(parsed.scores.total, 40.0);
        assert!(parsed.scores.content.is_none());
        assert!(parsed.analyses.overall_comment.is_empty());
        assert!(parsed.analyses.error_corrections.is_empty());
        assert!(!parsed.metadata.synthetic);
    }
}
