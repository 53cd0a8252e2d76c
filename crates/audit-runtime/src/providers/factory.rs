//! Adapter construction keyed on a model's backend.
//!
//! ## Usage
//!
//! ```ignore
//! let model = resolve_model("claude-haiku")?;
//! let adapter = create_adapter(&model, &RuntimeConfig::default()).await?;
//! ```

use std::sync::Arc;

use audit_core::{Backend, ModelDescriptor};

use super::{ProviderAdapter, ProviderError};
use crate::config::RuntimeConfig;

/// Build the adapter that serves `model`.
///
/// Fails with [`ProviderError::NotConfigured`] when the backend's cargo
/// feature is off or its credentials are missing.
pub async fn create_adapter(
    model: &ModelDescriptor,
    config: &RuntimeConfig,
) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    match model.shape.backend() {
        Backend::OpenAi => openai_adapter(config),
        Backend::Bedrock => bedrock_adapter(model).await,
    }
}

#[cfg(feature = "openai")]
fn openai_adapter(config: &RuntimeConfig) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    Ok(Arc::new(super::OpenAiAdapter::from_env(&config.openai)?))
}

#[cfg(not(feature = "openai"))]
fn openai_adapter(_config: &RuntimeConfig) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    Err(ProviderError::NotConfigured(
        "OpenAI models require the 'openai' feature".to_string(),
    ))
}

#[cfg(feature = "bedrock")]
async fn bedrock_adapter(
    model: &ModelDescriptor,
) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    let region = model.region.clone().ok_or_else(|| {
        ProviderError::NotConfigured(format!("no Bedrock region for {}", model.identifier))
    })?;
    Ok(Arc::new(super::BedrockAdapter::new(region).await))
}

#[cfg(not(feature = "bedrock"))]
async fn bedrock_adapter(
    _model: &ModelDescriptor,
) -> Result<Arc<dyn ProviderAdapter>, ProviderError> {
    Err(ProviderError::NotConfigured(
        "Bedrock models require the 'bedrock' feature".to_string(),
    ))
}
