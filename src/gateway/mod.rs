//! Provider gateway: uniform interface over AI grading backends.
//!
//! Concrete providers implement `GradingProvider` and are interchangeable;
//! selection happens in `build_provider` from configuration, never at call
//! sites. `ProviderGateway` wraps whichever provider is configured with a
//! wall-clock timeout and exponential-backoff retry of transient errors.
//!
//! The gateway is stateless and safe to call concurrently from any number of
//! workers.

pub mod providers;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::ProviderError;

pub use providers::{ChatCompletionsProvider, SyntheticProvider};

/// A grading request as the provider sees it.
#[derive(Debug, Clone)]
pub struct CorrectionRequest {
    /// The essay text.
    pub text: String,
    /// The essay title.
    pub title: String,
    /// Target grade level, passed through to the grading prompt.
    pub grade: String,
}

/// Raw response captured from a provider, before normalization.
///
/// The payload keeps the provider-specific schema untouched; the normalizer
/// is the only consumer of its shape.
#[derive(Debug, Clone)]
pub struct RawProviderResponse {
    /// Provider identifier the response came from.
    pub provider: String,
    /// Model version reported by the provider.
    pub model_version: String,
    /// Provider-specific JSON payload.
    pub payload: Value,
    /// Wall-clock duration of the call in milliseconds.
    pub latency_ms: u64,
    /// True when the response was fabricated in degraded mode.
    pub synthetic: bool,
}

/// A grading backend. Implementations must be stateless with respect to
/// individual calls.
#[async_trait]
pub trait GradingProvider: Send + Sync {
    /// Stable provider identifier; selects the alias table downstream.
    fn id(&self) -> &str;

    /// Performs a single grading call, no retry logic.
    async fn correct(
        &self,
        request: &CorrectionRequest,
    ) -> Result<RawProviderResponse, ProviderError>;
}

/// Builds the configured provider.
///
/// Without credentials the gateway degrades to the synthetic provider, which
/// returns clearly-tagged fabricated responses rather than silently
/// pretending to grade.
pub fn build_provider(config: &GatewayConfig) -> Arc<dyn GradingProvider> {
    match &config.api_key {
        Some(api_key) => Arc::new(ChatCompletionsProvider::new(
            &config.provider,
            api_key.clone(),
            &config.base_url,
            &config.model,
        )),
        None => {
            warn!(
                provider = %config.provider,
                "No API key configured, gateway running in degraded synthetic mode"
            );
            Arc::new(SyntheticProvider::new())
        }
    }
}

/// Gateway wrapping a provider with timeout and transient-error retry.
pub struct ProviderGateway {
    provider: Arc<dyn GradingProvider>,
    call_timeout: Duration,
    max_attempts: u32,
    retry_base_delay: Duration,
}

impl ProviderGateway {
    /// Creates a gateway around an explicit provider instance.
    pub fn new(provider: Arc<dyn GradingProvider>, config: &GatewayConfig) -> Self {
        Self {
            provider,
            call_timeout: config.call_timeout,
            max_attempts: config.max_retries.max(1),
            retry_base_delay: config.retry_base_delay,
        }
    }

    /// Creates a gateway with the provider selected by configuration.
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self::new(build_provider(config), config)
    }

    /// Returns the identifier of the underlying provider.
    pub fn provider_id(&self) -> &str {
        self.provider.id()
    }

    /// Performs a grading call with timeout and retry.
    ///
    /// Transient errors (timeout, rate limit, 5xx, connection failure) are
    /// retried with exponential backoff up to the configured attempt
    /// ceiling. Non-transient errors propagate immediately. A call that
    /// exceeds the timeout budget is abandoned and its eventual result
    /// discarded.
    pub async fn correct(
        &self,
        request: &CorrectionRequest,
    ) -> Result<RawProviderResponse, ProviderError> {
        let mut last_error = None;

        for attempt in 0..self.max_attempts {
            if attempt > 0 {
                let delay = backoff_delay(attempt, self.retry_base_delay);
                debug!(
                    provider = self.provider.id(),
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying provider call after transient failure"
                );
                tokio::time::sleep(delay).await;
            }

            match tokio::time::timeout(self.call_timeout, self.provider.correct(request)).await {
                Ok(Ok(response)) => return Ok(response),
                Ok(Err(err)) if err.is_transient() => {
                    warn!(
                        provider = self.provider.id(),
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "Transient provider error"
                    );
                    last_error = Some(err);
                }
                Ok(Err(err)) => return Err(err),
                Err(_) => {
                    warn!(
                        provider = self.provider.id(),
                        attempt = attempt + 1,
                        max_attempts = self.max_attempts,
                        timeout_secs = self.call_timeout.as_secs(),
                        "Provider call exceeded its timeout budget"
                    );
                    last_error = Some(ProviderError::Timeout(self.call_timeout));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ProviderError::RequestFailed("Retries exhausted with no error captured".to_string())
        }))
    }
}

/// Exponential backoff with jitter: base * 2^(attempt-1), plus up to 25%.
fn backoff_delay(attempt: u32, base: Duration) -> Duration {
    let exp = base.saturating_mul(1 << (attempt - 1).min(16));
    let jitter_ms = if exp.as_millis() > 0 {
        rand::rng().random_range(0..=(exp.as_millis() as u64 / 4).max(1))
    } else {
        0
    };
    exp + Duration::from_millis(jitter_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Provider that always fails with a configurable error.
    struct FailingProvider {
        calls: AtomicU32,
        transient: bool,
    }

    #[async_trait]
    impl GradingProvider for FailingProvider {
        fn id(&self) -> &str {
            "failing"
        }

        async fn correct(
            &self,
            _request: &CorrectionRequest,
        ) -> Result<RawProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.transient {
                Err(ProviderError::RateLimited("always".to_string()))
            } else {
                Err(ProviderError::Auth("bad key".to_string()))
            }
        }
    }

    /// Provider that never answers within any reasonable budget.
    struct HangingProvider {
        calls: AtomicU32,
    }

    #[async_trait]
    impl GradingProvider for HangingProvider {
        fn id(&self) -> &str {
            "hanging"
        }

        async fn correct(
            &self,
            _request: &CorrectionRequest,
        ) -> Result<RawProviderResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("sleep outlives every test timeout");
        }
    }

    fn test_config(max_retries: u32) -> GatewayConfig {
        GatewayConfig {
            call_timeout: Duration::from_millis(20),
            max_retries,
            retry_base_delay: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn request() -> CorrectionRequest {
        CorrectionRequest {
            text: "这是一篇作文".to_string(),
            title: "我的一天".to_string(),
            grade: "junior".to_string(),
        }
    }

    #[tokio::test]
    async fn test_transient_errors_retried_to_exhaustion() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicU32::new(0),
            transient: true,
        });
        let gateway = ProviderGateway::new(provider.clone(), &test_config(3));

        let err = gateway.correct(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited(_)));
        // Exactly the configured ceiling, never fewer, never looping forever.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_error_fails_immediately() {
        let provider = Arc::new(FailingProvider {
            calls: AtomicU32::new(0),
            transient: false,
        });
        let gateway = ProviderGateway::new(provider.clone(), &test_config(5));

        let err = gateway.correct(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Auth(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_transient() {
        let provider = Arc::new(HangingProvider {
            calls: AtomicU32::new(0),
        });
        let gateway = ProviderGateway::new(provider.clone(), &test_config(2));

        let err = gateway.correct(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Timeout(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_degraded_mode_returns_tagged_synthetic_response() {
        let config = GatewayConfig {
            api_key: None,
            ..test_config(1)
        };
        let gateway = ProviderGateway::from_config(&config);

        assert_eq!(gateway.provider_id(), "synthetic");
        let response = gateway.correct(&request()).await.expect("synthetic grading");
        assert!(response.synthetic);
    }

    #[test]
    fn test_backoff_delay_grows() {
        let base = Duration::from_millis(100);
        let first = backoff_delay(1, base);
        let third = backoff_delay(3, base);

        assert!(first >= Duration::from_millis(100));
        assert!(third >= Duration::from_millis(400));
    }
}
