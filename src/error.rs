//! Error types for redink pipeline operations.
//!
//! Defines error types for the major subsystems:
//! - Submission validation
//! - Provider gateway calls
//! - Raw response normalization
//!
//! Storage, queue and worker pool errors live next to their owning types
//! (`store::StoreError`, `scheduler::QueueError`, `scheduler::PoolError`).

use std::time::Duration;

use thiserror::Error;

/// Errors raised synchronously by submission intake.
///
/// Nothing in this enum is retried: the caller fixes the input or the
/// submission never happened.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Essay content must not be empty")]
    EmptyContent,

    #[error("Essay title must not be empty")]
    EmptyTitle,

    #[error("Essay title too long: {len} characters (maximum {max})")]
    TitleTooLong { len: usize, max: usize },

    #[error("Unknown source type '{0}': expected one of text, upload, paste, api")]
    InvalidSourceType(String),
}

/// Errors that can occur when calling a grading provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The call exceeded its wall-clock budget.
    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    /// The provider rejected the request due to rate limiting.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Authentication or authorization failed. Never retried.
    #[error("Provider authentication failed: {0}")]
    Auth(String),

    /// The provider returned a non-success HTTP status.
    #[error("Provider API error ({code}): {message}")]
    Api { code: u16, message: String },

    /// The HTTP request itself failed (connection, DNS, TLS).
    #[error("Provider request failed: {0}")]
    RequestFailed(String),

    /// The provider answered but the body was not usable JSON.
    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),
}

impl ProviderError {
    /// Returns whether the error is transient and worth retrying.
    ///
    /// Timeouts, rate limits, connection failures and 5xx responses are
    /// transient. Auth failures, client errors and unparseable responses
    /// are not: retrying them burns attempts without changing the outcome.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::Timeout(_) => true,
            ProviderError::RateLimited(_) => true,
            ProviderError::RequestFailed(_) => true,
            ProviderError::Api { code, .. } => *code >= 500 || *code == 429,
            ProviderError::Auth(_) => false,
            ProviderError::MalformedResponse(_) => false,
        }
    }
}

/// Errors that can occur while normalizing a raw provider response.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// The raw payload was not a JSON object.
    #[error("Provider '{0}' returned a non-object payload")]
    NotAnObject(String),

    /// A required canonical field was absent under every declared alias.
    #[error("Required field '{field}' missing from '{provider}' response under all aliases")]
    MissingRequiredField { field: String, provider: String },

    /// A required score was present but could not be coerced to a number,
    /// or fell outside the accepted range.
    #[error("Invalid score for '{field}': {value}")]
    InvalidScore { field: String, value: String },

    /// An alias table definition was malformed.
    #[error("Invalid alias table for provider '{provider}': {message}")]
    InvalidAliasTable { provider: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_transient_classification() {
        assert!(ProviderError::Timeout(Duration::from_secs(60)).is_transient());
        assert!(ProviderError::RateLimited("slow down".into()).is_transient());
        assert!(ProviderError::RequestFailed("connection refused".into()).is_transient());
        assert!(ProviderError::Api {
            code: 503,
            message: "unavailable".into()
        }
        .is_transient());
        assert!(ProviderError::Api {
            code: 429,
            message: "too many requests".into()
        }
        .is_transient());

        assert!(!ProviderError::Auth("bad key".into()).is_transient());
        assert!(!ProviderError::Api {
            code: 400,
            message: "bad request".into()
        }
        .is_transient());
        assert!(!ProviderError::MalformedResponse("not json".into()).is_transient());
    }

    #[test]
    fn test_submit_error_display() {
        let err = SubmitError::InvalidSourceType("carrier-pigeon".to_string());
        assert!(err.to_string().contains("carrier-pigeon"));

        let err = SubmitError::TitleTooLong { len: 300, max: 256 };
        assert!(err.to_string().contains("300"));
        assert!(err.to_string().contains("256"));
    }

    #[test]
    fn test_normalize_error_display() {
        let err = NormalizeError::MissingRequiredField {
            field: "scores.total".to_string(),
            provider: "deepseek".to_string(),
        };
        assert!(err.to_string().contains("scores.total"));
        assert!(err.to_string().contains("deepseek"));
    }
}
