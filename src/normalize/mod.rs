//! Heterogeneous-response normalization.
//!
//! Maps arbitrary provider JSON into the canonical scoring/analysis schema
//! via per-provider alias tables. `normalize` is a pure function: the same
//! raw response and table always yield the same output, so a normalization
//! can be safely re-run without re-calling the provider.

pub mod aliases;

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::NormalizeError;
use crate::gateway::RawProviderResponse;
use crate::model::{
    Analyses, CanonicalResult, DimensionComments, ErrorCorrection, ResultMeta, Scores,
};

pub use aliases::{field, AliasTable};

/// Scores outside this range are provider garbage, not grades.
const SCORE_RANGE: std::ops::RangeInclusive<f64> = 0.0..=200.0;

/// Candidate keys for the parts of an error-correction entry. These are
/// entry-local and shared across providers, unlike the top-level tables.
const CORRECTION_ORIGINAL_KEYS: &[&str] = &["原句", "original", "sentence"];
const CORRECTION_REVISED_KEYS: &[&str] = &["修改", "修改后", "corrected", "revised"];
const CORRECTION_REASON_KEYS: &[&str] = &["说明", "解释", "explanation", "reason"];

/// Normalizes a raw provider response into the canonical result schema.
///
/// The total score is required: if it is absent under every alias the whole
/// result is rejected with `NormalizeError::MissingRequiredField`. Every
/// other field is optional and defaults rather than failing the result.
pub fn normalize(
    raw: &RawProviderResponse,
    table: &AliasTable,
) -> Result<CanonicalResult, NormalizeError> {
    let obj = raw
        .payload
        .as_object()
        .ok_or_else(|| NormalizeError::NotAnObject(raw.provider.clone()))?;

    let flat = flatten(obj);

    let total = require_score(&flat, table, field::TOTAL, &raw.provider)?;

    let scores = Scores {
        total,
        content: optional_score(&flat, table, field::CONTENT),
        language: optional_score(&flat, table, field::LANGUAGE),
        structure: optional_score(&flat, table, field::STRUCTURE),
        writing: optional_score(&flat, table, field::WRITING),
    };

    let analyses = Analyses {
        overall_comment: optional_string(&flat, table, field::OVERALL_COMMENT),
        dimension_comments: DimensionComments {
            content: optional_string(&flat, table, field::CONTENT_COMMENT),
            language: optional_string(&flat, table, field::LANGUAGE_COMMENT),
            structure: optional_string(&flat, table, field::STRUCTURE_COMMENT),
            writing: optional_string(&flat, table, field::WRITING_COMMENT),
        },
        improvement_suggestions: optional_string_list(&flat, table, field::SUGGESTIONS),
        error_corrections: optional_corrections(&flat, table, field::ERROR_CORRECTIONS),
    };

    Ok(CanonicalResult {
        scores,
        analyses,
        metadata: ResultMeta {
            provider: raw.provider.clone(),
            model_version: raw.model_version.clone(),
            processing_time_ms: raw.latency_ms,
            synthetic: raw.synthetic,
        },
    })
}

/// Flattens a JSON object into a key → value map.
///
/// Both dotted paths (`"维度.内容分"`) and bare keys (`"内容分"`) are
/// recorded so alias candidates can name either. The first occurrence of a
/// key wins, preserving document order for duplicate bare keys at different
/// nesting depths.
fn flatten(obj: &Map<String, Value>) -> HashMap<String, &Value> {
    let mut out = HashMap::new();
    flatten_into("", obj, &mut out);
    out
}

fn flatten_into<'a>(prefix: &str, obj: &'a Map<String, Value>, out: &mut HashMap<String, &'a Value>) {
    for (key, value) in obj {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", prefix, key)
        };

        out.entry(path.clone()).or_insert(value);
        // Top-level keys are already bare.
        if !prefix.is_empty() {
            out.entry(key.clone()).or_insert(value);
        }

        if let Value::Object(nested) = value {
            flatten_into(&path, nested, out);
        }
    }
}

/// Returns the first present, non-null value among the declared candidates.
fn lookup<'a>(
    flat: &HashMap<String, &'a Value>,
    table: &AliasTable,
    canonical: &str,
) -> Option<&'a Value> {
    table
        .candidates(canonical)
        .iter()
        .filter_map(|candidate| flat.get(candidate.as_str()).copied())
        .find(|value| !value.is_null())
}

fn require_score(
    flat: &HashMap<String, &Value>,
    table: &AliasTable,
    canonical: &str,
    provider: &str,
) -> Result<f64, NormalizeError> {
    let value = lookup(flat, table, canonical).ok_or_else(|| {
        NormalizeError::MissingRequiredField {
            field: canonical.to_string(),
            provider: provider.to_string(),
        }
    })?;

    let score = coerce_score(value).ok_or_else(|| NormalizeError::InvalidScore {
        field: canonical.to_string(),
        value: value.to_string(),
    })?;

    if !SCORE_RANGE.contains(&score) {
        return Err(NormalizeError::InvalidScore {
            field: canonical.to_string(),
            value: score.to_string(),
        });
    }

    Ok(score)
}

/// Optional score: absent, null, or uncoercible values all yield `None`.
/// A dimension score is never worth rejecting the whole result over.
fn optional_score(flat: &HashMap<String, &Value>, table: &AliasTable, canonical: &str) -> Option<f64> {
    lookup(flat, table, canonical)
        .and_then(coerce_score)
        .filter(|score| SCORE_RANGE.contains(score))
}

fn optional_string(flat: &HashMap<String, &Value>, table: &AliasTable, canonical: &str) -> String {
    lookup(flat, table, canonical)
        .and_then(coerce_string)
        .unwrap_or_default()
}

fn optional_string_list(
    flat: &HashMap<String, &Value>,
    table: &AliasTable,
    canonical: &str,
) -> Vec<String> {
    match lookup(flat, table, canonical) {
        Some(Value::Array(items)) => items.iter().filter_map(coerce_string).collect(),
        Some(value) => coerce_string(value).map(|s| vec![s]).unwrap_or_default(),
        None => Vec::new(),
    }
}

fn optional_corrections(
    flat: &HashMap<String, &Value>,
    table: &AliasTable,
    canonical: &str,
) -> Vec<ErrorCorrection> {
    match lookup(flat, table, canonical) {
        Some(Value::Array(items)) => items.iter().filter_map(coerce_correction).collect(),
        Some(value) => coerce_correction(value).map(|c| vec![c]).unwrap_or_default(),
        None => Vec::new(),
    }
}

fn coerce_correction(value: &Value) -> Option<ErrorCorrection> {
    match value {
        Value::Object(obj) => {
            let pick = |keys: &[&str]| {
                keys.iter()
                    .filter_map(|k| obj.get(*k))
                    .find_map(coerce_string)
                    .unwrap_or_default()
            };
            Some(ErrorCorrection {
                original: pick(CORRECTION_ORIGINAL_KEYS),
                corrected: pick(CORRECTION_REVISED_KEYS),
                explanation: pick(CORRECTION_REASON_KEYS),
            })
        }
        // A bare string is the grader's remark without structure.
        Value::String(s) if !s.is_empty() => Some(ErrorCorrection {
            explanation: s.clone(),
            ..Default::default()
        }),
        _ => None,
    }
}

/// Coerces a JSON value to a score. Numbers pass through; numeric strings
/// (with an optional trailing `分`) are parsed. Everything else is rejected.
fn coerce_score(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim().trim_end_matches('分').trim();
            trimmed.parse::<f64>().ok()
        }
        _ => None,
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
