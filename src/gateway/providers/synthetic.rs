//! Degraded-mode synthetic provider.
//!
//! Used when no provider credentials are configured. Responses are
//! deterministic, derived only from the request, and always carry
//! `synthetic = true` so nothing downstream can mistake them for real
//! grades.

use async_trait::async_trait;
use serde_json::json;

use crate::error::ProviderError;
use crate::gateway::{CorrectionRequest, GradingProvider, RawProviderResponse};
use crate::model::essay::count_chars;

const SYNTHETIC_MODEL: &str = "synthetic-v1";

/// Provider that fabricates a plausible, clearly-tagged grading response.
#[derive(Debug, Default)]
pub struct SyntheticProvider;

impl SyntheticProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl GradingProvider for SyntheticProvider {
    fn id(&self) -> &str {
        "synthetic"
    }

    async fn correct(
        &self,
        request: &CorrectionRequest,
    ) -> Result<RawProviderResponse, ProviderError> {
        let chars = count_chars(&request.text) as f64;
        // Length-based placeholder: long enough essays plateau at 45/50.
        let total = (30.0 + chars / 60.0).min(45.0);
        let dimension = (total / 4.0 * 10.0).round() / 10.0;

        let payload = json!({
            "total_score": total,
            "content_score": dimension,
            "language_score": dimension,
            "structure_score": dimension,
            "writing_score": dimension,
            "overall_comment": format!(
                "Synthetic placeholder grade for '{}' ({} characters). \
                 No provider credentials were configured.",
                request.title, chars as i64
            ),
            "improvement_suggestions": ["Configure a grading provider to receive real feedback."],
            "error_corrections": [],
        });

        Ok(RawProviderResponse {
            provider: self.id().to_string(),
            model_version: SYNTHETIC_MODEL.to_string(),
            payload,
            latency_ms: 0,
            synthetic: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: &str) -> CorrectionRequest {
        CorrectionRequest {
            text: text.to_string(),
            title: "题目".to_string(),
            grade: "junior".to_string(),
        }
    }

    #[tokio::test]
    async fn test_synthetic_response_is_tagged() {
        let provider = SyntheticProvider::new();
        let response = provider.correct(&request("这是作文")).await.expect("grading");

        assert!(response.synthetic);
        assert_eq!(response.provider, "synthetic");
        assert_eq!(response.model_version, SYNTHETIC_MODEL);
    }

    #[tokio::test]
    async fn test_synthetic_response_is_deterministic() {
        let provider = SyntheticProvider::new();
        let req = request("春天来了，花开了。");

        let first = provider.correct(&req).await.expect("grading");
        let second = provider.correct(&req).await.expect("grading");
        assert_eq!(first.payload, second.payload);
    }

    #[tokio::test]
    async fn test_synthetic_score_within_range() {
        let provider = SyntheticProvider::new();
        let long_text = "字".repeat(5000);

        let response = provider.correct(&request(&long_text)).await.expect("grading");
        let total = response.payload["total_score"].as_f64().expect("score");
        assert!(total <= 45.0);
        assert!(total >= 30.0);
    }
}
