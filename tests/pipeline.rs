//! End-to-end tests for the grading path that needs no external services:
//! gateway (synthetic/mock providers) through normalization into the
//! canonical result schema.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;

use redink::error::ProviderError;
use redink::gateway::{
    CorrectionRequest, GradingProvider, ProviderGateway, RawProviderResponse,
};
use redink::normalize::{normalize, AliasTable};
use redink::GatewayConfig;

fn request(text: &str) -> CorrectionRequest {
    CorrectionRequest {
        text: text.to_string(),
        title: "我的一天".to_string(),
        grade: "junior".to_string(),
    }
}

/// Provider replaying a canned DeepSeek-style payload with Chinese keys.
struct CannedDeepseek;

#[async_trait]
impl GradingProvider for CannedDeepseek {
    fn id(&self) -> &str {
        "deepseek"
    }

    async fn correct(
        &self,
        _request: &CorrectionRequest,
    ) -> Result<RawProviderResponse, ProviderError> {
        Ok(RawProviderResponse {
            provider: "deepseek".to_string(),
            model_version: "deepseek-chat".to_string(),
            payload: json!({
                "总分": "42分",
                "内容分": 12,
                "语言分": 10.5,
                "总评": "结构完整，语言流畅。",
                "改进建议": ["注意错别字", "多用修辞"],
                "病句修改": [
                    { "原句": "我非常很高兴", "修改": "我非常高兴", "说明": "重复修饰" }
                ],
            }),
            latency_ms: 850,
            synthetic: false,
        })
    }
}

#[tokio::test]
async fn test_deepseek_payload_normalizes_end_to_end() {
    let config = GatewayConfig {
        call_timeout: Duration::from_secs(1),
        max_retries: 1,
        ..Default::default()
    };
    let gateway = ProviderGateway::new(Arc::new(CannedDeepseek), &config);

    let raw = gateway.correct(&request("这是一篇作文")).await.expect("grading");
    let table = AliasTable::for_provider(&raw.provider);
    let result = normalize(&raw, &table).expect("normalization");

    // "42分" coerces to a number; dimensions arrive under Chinese aliases.
    assert_eq!(result.scores.total, 42.0);
    assert_eq!(result.scores.content, Some(12.0));
    assert_eq!(result.scores.language, Some(10.5));
    assert_eq!(result.analyses.overall_comment, "结构完整，语言流畅。");
    assert_eq!(result.analyses.improvement_suggestions.len(), 2);
    assert_eq!(result.analyses.error_corrections[0].corrected, "我非常高兴");

    assert_eq!(result.metadata.provider, "deepseek");
    assert_eq!(result.metadata.model_version, "deepseek-chat");
    assert!(!result.metadata.synthetic);
}

#[tokio::test]
async fn test_degraded_mode_tags_synthetic_end_to_end() {
    // No api_key: the gateway must fall back to the synthetic provider and
    // the flag must survive into the canonical metadata.
    let config = GatewayConfig {
        api_key: None,
        call_timeout: Duration::from_secs(1),
        max_retries: 1,
        ..Default::default()
    };
    let gateway = ProviderGateway::from_config(&config);
    assert_eq!(gateway.provider_id(), "synthetic");

    let raw = gateway.correct(&request("春天来了，花开了。")).await.expect("grading");
    assert!(raw.synthetic);

    let table = AliasTable::for_provider(&raw.provider);
    let result = normalize(&raw, &table).expect("normalization");

    assert!(result.metadata.synthetic);
    assert_eq!(result.metadata.provider, "synthetic");
    assert!(result.scores.total >= 30.0);
    assert!(result.scores.total <= 45.0);
}

#[tokio::test]
async fn test_normalization_is_idempotent_over_gateway_output() {
    let config = GatewayConfig {
        call_timeout: Duration::from_secs(1),
        max_retries: 1,
        ..Default::default()
    };
    let gateway = ProviderGateway::new(Arc::new(CannedDeepseek), &config);

    let raw = gateway.correct(&request("作文")).await.expect("grading");
    let table = AliasTable::for_provider(&raw.provider);

    let first = normalize(&raw, &table).expect("first pass");
    let second = normalize(&raw, &table).expect("second pass");
    assert_eq!(first, second);
}

/// Provider whose payload carries nothing the alias table can use.
struct GarbageProvider;

#[async_trait]
impl GradingProvider for GarbageProvider {
    fn id(&self) -> &str {
        "deepseek"
    }

    async fn correct(
        &self,
        _request: &CorrectionRequest,
    ) -> Result<RawProviderResponse, ProviderError> {
        Ok(RawProviderResponse {
            provider: "deepseek".to_string(),
            model_version: "deepseek-chat".to_string(),
            payload: json!({ "essay_feedback": "looks fine", "quality": "high" }),
            latency_ms: 10,
            synthetic: false,
        })
    }
}

#[tokio::test]
async fn test_unusable_payload_is_rejected_not_defaulted() {
    let config = GatewayConfig {
        call_timeout: Duration::from_secs(1),
        max_retries: 1,
        ..Default::default()
    };
    let gateway = ProviderGateway::new(Arc::new(GarbageProvider), &config);

    let raw = gateway.correct(&request("作文")).await.expect("call succeeds");
    let table = AliasTable::for_provider(&raw.provider);

    // A payload without a recognizable total must fail normalization rather
    // than produce a zero-score result.
    let err = normalize(&raw, &table).unwrap_err();
    assert!(err.to_string().contains("scores.total"));
}
