//! OpenAI chat completions transport.
//!
//! ## Security
//!
//! The API key and optional organization are held as [`ApiCredential`]s and
//! only exposed when the request headers are built.

use super::{
    codec,
    secrets::{ApiCredential, CredentialSource},
    ProviderAdapter, ProviderError,
};
use crate::config::OpenAiConfig;
use async_trait::async_trait;
use audit_core::ModelDescriptor;
use serde::Deserialize;
use std::time::Duration;

/// Environment variable name for the OpenAI API key.
pub const OPENAI_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Environment variable name for the OpenAI organization.
pub const OPENAI_ORG_ENV: &str = "OPENAI_API_ORG";

/// Adapter for `gpt-*` models.
pub struct OpenAiAdapter {
    credential: ApiCredential,
    organization: Option<ApiCredential>,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiAdapter")
            .field("credential", &self.credential)
            .field("organization", &self.organization)
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiAdapter {
    /// Create an adapter with an explicit key.
    pub fn new(api_key: impl Into<String>, config: &OpenAiConfig) -> Result<Self, ProviderError> {
        let credential =
            ApiCredential::new(api_key, CredentialSource::Programmatic, "OpenAI API key");
        Self::with_credentials(credential, None, config)
    }

    /// Read `OPENAI_API_KEY` (required) and `OPENAI_API_ORG` (optional).
    pub fn from_env(config: &OpenAiConfig) -> Result<Self, ProviderError> {
        let credential = ApiCredential::from_env(OPENAI_API_KEY_ENV, "OpenAI API key")?;
        let organization = ApiCredential::from_env_optional(OPENAI_ORG_ENV, "OpenAI organization");
        Self::with_credentials(credential, organization, config)
    }

    fn with_credentials(
        credential: ApiCredential,
        organization: Option<ApiCredential>,
        config: &OpenAiConfig,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ProviderError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self {
            credential,
            organization,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiError {
    error: OpenAiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// Error code OpenAI sends with a 429 once the account quota is used up.
const INSUFFICIENT_QUOTA: &str = "insufficient_quota";

fn parse_retry_after(value: &str) -> Option<Duration> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
}

/// Pull `error.message` out of an error body, falling back to the raw text.
fn error_message(body: &[u8]) -> String {
    serde_json::from_slice::<OpenAiError>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned())
}

/// Whether a 429 body reports an exhausted quota rather than throttling.
fn is_quota_exhausted(body: &[u8]) -> bool {
    let Ok(OpenAiError { error }) = serde_json::from_slice::<OpenAiError>(body) else {
        return false;
    };
    error.code.as_ref().and_then(|c| c.as_str()) == Some(INSUFFICIENT_QUOTA)
        || error.kind.as_deref() == Some(INSUFFICIENT_QUOTA)
}

/// Map a 429 reply. An exhausted quota will not recover by waiting.
fn classify_too_many_requests(retry_after: Option<Duration>, body: &[u8]) -> ProviderError {
    if is_quota_exhausted(body) {
        ProviderError::ApiError {
            status: 429,
            message: error_message(body),
        }
    } else {
        ProviderError::RateLimited { retry_after }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    async fn invoke(
        &self,
        model: &ModelDescriptor,
        system_message: &str,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let body = codec::build_request(model, system_message, prompt);

        // SECURITY: Only expose the credentials here, at the point of use
        let mut request = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.credential.expose())
            .json(&body);
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org.expose());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout
            } else {
                ProviderError::HttpError(e.to_string())
            }
        })?;

        if status.as_u16() == 429 {
            return Err(classify_too_many_requests(retry_after, &bytes));
        }

        if !status.is_success() {
            return Err(ProviderError::from_status(
                status.as_u16(),
                error_message(&bytes),
            ));
        }

        codec::parse_response(model.shape, &bytes)
    }

    fn name(&self) -> &str {
        "openai"
    }
}
