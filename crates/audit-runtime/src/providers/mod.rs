//! Provider adapters for audit-runtime.
//!
//! An adapter turns a normalized `(model, system message, prompt)` call into
//! one provider-native request, sends it, and turns the reply back into plain
//! text. Two transports exist: the OpenAI chat API over HTTPS and Bedrock
//! `InvokeModel`. Request and response shapes are handled by [`codec`], keyed
//! on the model's [`ApiShape`](audit_core::ApiShape).
//!
//! ## Security
//!
//! API keys go through the [`secrets`] module. See [`ApiCredential`].

use async_trait::async_trait;
use audit_core::ModelDescriptor;
use std::time::Duration;
use thiserror::Error;

pub mod codec;
mod factory;
pub mod secrets;
pub mod tokenizer;

#[cfg(feature = "bedrock")]
mod bedrock;
#[cfg(feature = "openai")]
mod openai;

pub use codec::{build_request, parse_response, MAX_OUTPUT_TOKENS};
pub use factory::create_adapter;
pub use secrets::{ApiCredential, CredentialSource};
pub use tokenizer::{approximate_tokens, estimate_tokens};

#[cfg(feature = "bedrock")]
pub use bedrock::BedrockAdapter;
#[cfg(feature = "openai")]
pub use openai::OpenAiAdapter;

/// Errors from LLM providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limit exceeded, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Service unavailable: {status} - {message}")]
    ServiceUnavailable { status: u16, message: String },

    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },

    #[error("JSON parse error: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Request timed out")]
    Timeout,

    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

/// Whether retrying a failed call can help.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Throttling, timeouts, 5xx and connection failures
    Transient,
    /// Bad requests, auth failures, unparseable bodies
    Permanent,
}

impl ProviderError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::ServiceUnavailable { .. }
            | ProviderError::Timeout => FailureKind::Transient,
            ProviderError::ApiError { .. }
            | ProviderError::ParseError(_)
            | ProviderError::AuthError
            | ProviderError::NotConfigured(_) => FailureKind::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == FailureKind::Transient
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            401 | 403 => ProviderError::AuthError,
            408 => ProviderError::Timeout,
            429 => ProviderError::RateLimited { retry_after: None },
            500..=599 => ProviderError::ServiceUnavailable { status, message },
            _ => ProviderError::ApiError { status, message },
        }
    }
}

/// One backend's translation between the normalized call and the network.
///
/// Adapters never retry and never touch rate budgets; the
/// [`RetryingInvoker`](crate::resilience::RetryingInvoker) owns both.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Send one request and return the response text, trimmed.
    ///
    /// A reply without any text segments is `Ok("")`, not an error.
    async fn invoke(
        &self,
        model: &ModelDescriptor,
        system_message: &str,
        prompt: &str,
    ) -> Result<String, ProviderError>;

    /// Get provider name for logs.
    fn name(&self) -> &str;

    /// Token cost charged against the model's token budget for one call.
    fn estimate_tokens(&self, model: &ModelDescriptor, system_message: &str, prompt: &str) -> u32 {
        estimate_tokens(model, system_message, prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::RateLimited { retry_after: None }.is_transient());
        assert!(ProviderError::Timeout.is_transient());
        assert!(ProviderError::HttpError("connection reset".into()).is_transient());
        assert!(ProviderError::ServiceUnavailable {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
    }

    #[test]
    fn test_permanent_classification() {
        assert!(!ProviderError::AuthError.is_transient());
        assert!(!ProviderError::ParseError("eof".into()).is_transient());
        assert!(!ProviderError::NotConfigured("no key".into()).is_transient());
        assert_eq!(
            ProviderError::ApiError {
                status: 400,
                message: "bad".into()
            }
            .kind(),
            FailureKind::Permanent
        );
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(ProviderError::from_status(401, "x"), ProviderError::AuthError));
        assert!(matches!(ProviderError::from_status(403, "x"), ProviderError::AuthError));
        assert!(matches!(ProviderError::from_status(408, "x"), ProviderError::Timeout));
        assert!(matches!(
            ProviderError::from_status(429, "x"),
            ProviderError::RateLimited { .. }
        ));
        assert!(matches!(
            ProviderError::from_status(502, "bad gateway"),
            ProviderError::ServiceUnavailable { status: 502, .. }
        ));
        assert!(matches!(
            ProviderError::from_status(400, "invalid"),
            ProviderError::ApiError { status: 400, .. }
        ));
    }
}
