//! AWS Bedrock `InvokeModel` transport.
//!
//! Credentials come from the AWS default provider chain. The SDK's own retry
//! layer is disabled so that every attempt passes through the rate budgets.

use super::{codec, ProviderAdapter, ProviderError};
use async_trait::async_trait;
use audit_core::ModelDescriptor;
use aws_sdk_bedrockruntime::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_bedrockruntime::operation::invoke_model::InvokeModelError;
use aws_sdk_bedrockruntime::primitives::Blob;
use aws_sdk_bedrockruntime::Client as BedrockClient;
use tracing::debug;

/// Adapter for every non-OpenAI model in the catalog. One instance serves a
/// single region.
pub struct BedrockAdapter {
    client: BedrockClient,
    region: String,
}

impl std::fmt::Debug for BedrockAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BedrockAdapter")
            .field("region", &self.region)
            .finish()
    }
}

impl BedrockAdapter {
    /// Load AWS configuration for `region` and build a runtime client.
    pub async fn new(region: impl Into<String>) -> Self {
        let region = region.into();
        let aws_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(region.clone()))
            .retry_config(aws_config::retry::RetryConfig::disabled())
            .load()
            .await;
        debug!(region = %region, "Bedrock client initialized");

        Self {
            client: BedrockClient::new(&aws_config),
            region,
        }
    }
}

/// Map a Bedrock service error code onto a [`ProviderError`].
fn classify_service_code(code: Option<&str>, message: String, status: u16) -> ProviderError {
    match code.unwrap_or_default() {
        "ThrottlingException" => ProviderError::RateLimited { retry_after: None },
        "ModelTimeoutException" => ProviderError::Timeout,
        "InternalServerException" | "ServiceUnavailableException" | "ModelNotReadyException" => {
            ProviderError::ServiceUnavailable { status, message }
        }
        "AccessDeniedException" | "UnrecognizedClientException" | "ExpiredTokenException" => {
            ProviderError::AuthError
        }
        _ => ProviderError::ApiError { status, message },
    }
}

fn classify_sdk_error(err: SdkError<InvokeModelError>) -> ProviderError {
    match &err {
        SdkError::ServiceError(service_err) => {
            let inner = service_err.err();
            let message = inner
                .message()
                .map(str::to_string)
                .unwrap_or_else(|| DisplayErrorContext(&err).to_string());
            classify_service_code(inner.code(), message, service_err.raw().status().as_u16())
        }
        SdkError::TimeoutError(_) => ProviderError::Timeout,
        SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            ProviderError::HttpError(DisplayErrorContext(&err).to_string())
        }
        _ => ProviderError::NotConfigured(DisplayErrorContext(&err).to_string()),
    }
}

#[async_trait]
impl ProviderAdapter for BedrockAdapter {
    async fn invoke(
        &self,
        model: &ModelDescriptor,
        system_message: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let body = serde_json::to_vec(&codec::build_request(model, system_message, prompt))
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let output = self
            .client
            .invoke_model()
            .model_id(&model.identifier)
            .content_type("application/json")
            .accept("application/json")
            .body(Blob::new(body))
            .send()
            .await
            .map_err(classify_sdk_error)?;

        codec::parse_response(model.shape, output.body().as_ref())
    }

    fn name(&self) -> &str {
        "bedrock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::FailureKind;

    fn classify(code: &str, status: u16) -> ProviderError {
        classify_service_code(Some(code), "msg".to_string(), status)
    }

    #[test]
    fn test_throttling_is_rate_limited() {
        assert!(matches!(
            classify("ThrottlingException", 429),
            ProviderError::RateLimited { .. }
        ));
    }

    #[test]
    fn test_transient_codes() {
        for code in [
            "ThrottlingException",
            "ModelTimeoutException",
            "InternalServerException",
            "ServiceUnavailableException",
            "ModelNotReadyException",
        ] {
            assert_eq!(classify(code, 500).kind(), FailureKind::Transient, "code {code}");
        }
    }

    #[test]
    fn test_permanent_codes() {
        for code in [
            "ValidationException",
            "AccessDeniedException",
            "ServiceQuotaExceededException",
            "ResourceNotFoundException",
        ] {
            assert_eq!(classify(code, 400).kind(), FailureKind::Permanent, "code {code}");
        }
    }

    #[test]
    fn test_unknown_code_keeps_status() {
        match classify_service_code(None, "boom".to_string(), 418) {
            ProviderError::ApiError { status, message } => {
                assert_eq!(status, 418);
                assert_eq!(message, "boom");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
