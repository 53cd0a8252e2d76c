//! Static model catalog.
//!
//! Maps the short names accepted on the command line to fully-qualified
//! provider identifiers, and carries the per-model quotas the limiters are
//! built from. The table is fixed at compile time; nothing here is tunable at
//! runtime.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of calls in flight at once, across all models.
pub const CONNECTION_LIMIT: usize = 100;

/// Errors from catalog lookups.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown model '{name}'. Available models: {}", available.join(", "))]
    UnknownModel {
        name: String,
        available: Vec<&'static str>,
    },
}

/// Which remote API a model is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    OpenAi,
    Bedrock,
}

/// Role-tagged chat dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatDialect {
    /// OpenAI chat completions.
    OpenAi,
    /// Anthropic messages on Bedrock (content blocks).
    AnthropicMessages,
}

/// Single-prompt-string completion dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionDialect {
    /// `Human:` / `Assistant:` framed prompt with a `completion` field back.
    AnthropicText,
    /// Mistral prompt with an `outputs` array back.
    Mistral,
}

/// Request/response shape of a provider family.
///
/// Resolved once when a [`ModelDescriptor`] is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "style", content = "dialect", rename_all = "snake_case")]
pub enum ApiShape {
    Chat(ChatDialect),
    LegacyCompletion(CompletionDialect),
    /// Llama-style delimited template with a single `generation` field back.
    InstructModel,
}

/// The only Anthropic identifier that still speaks the text-completion API.
const LEGACY_ANTHROPIC_ID: &str = "anthropic.claude-v2:1";

impl ApiShape {
    /// Resolve the shape for a fully-qualified model identifier.
    pub fn for_identifier(identifier: &str) -> Self {
        if identifier.contains("gpt") {
            ApiShape::Chat(ChatDialect::OpenAi)
        } else if identifier == LEGACY_ANTHROPIC_ID {
            ApiShape::LegacyCompletion(CompletionDialect::AnthropicText)
        } else if identifier.contains("claude") {
            ApiShape::Chat(ChatDialect::AnthropicMessages)
        } else if identifier.contains("llama") {
            ApiShape::InstructModel
        } else {
            ApiShape::LegacyCompletion(CompletionDialect::Mistral)
        }
    }

    /// Backend that serves this shape.
    pub fn backend(&self) -> Backend {
        match self {
            ApiShape::Chat(ChatDialect::OpenAi) => Backend::OpenAi,
            _ => Backend::Bedrock,
        }
    }
}

impl fmt::Display for ApiShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiShape::Chat(ChatDialect::OpenAi) => write!(f, "chat/openai"),
            ApiShape::Chat(ChatDialect::AnthropicMessages) => write!(f, "chat/anthropic-messages"),
            ApiShape::LegacyCompletion(CompletionDialect::AnthropicText) => {
                write!(f, "completion/anthropic-text")
            }
            ApiShape::LegacyCompletion(CompletionDialect::Mistral) => write!(f, "completion/mistral"),
            ApiShape::InstructModel => write!(f, "instruct/llama"),
        }
    }
}

/// A budget of `count` units per `period`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub count: u32,
    pub period: Duration,
}

impl Quota {
    pub const fn per_secs(count: u32, secs: u64) -> Self {
        Self {
            count,
            period: Duration::from_secs(secs),
        }
    }
}

/// Everything the runtime needs to know about one model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Human-facing name, e.g. `claude-haiku`
    pub short_name: String,

    /// Provider model identifier, e.g. `anthropic.claude-3-haiku-20240307-v1:0`
    pub identifier: String,

    pub shape: ApiShape,

    /// AWS region for Bedrock models
    pub region: Option<String>,

    pub request_quota: Quota,

    pub token_quota: Quota,
}

impl ModelDescriptor {
    /// Build a descriptor, resolving shape and region from the identifier.
    pub fn new(
        short_name: impl Into<String>,
        identifier: impl Into<String>,
        request_quota: Quota,
        token_quota: Quota,
    ) -> Self {
        let identifier = identifier.into();
        let shape = ApiShape::for_identifier(&identifier);
        let region = match shape.backend() {
            Backend::OpenAi => None,
            Backend::Bedrock if identifier.contains("llama") => Some("us-west-2".to_string()),
            Backend::Bedrock => Some("us-east-1".to_string()),
        };

        Self {
            short_name: short_name.into(),
            identifier,
            shape,
            region,
            request_quota,
            token_quota,
        }
    }

    pub fn backend(&self) -> Backend {
        self.shape.backend()
    }
}

struct CatalogEntry {
    short_name: &'static str,
    identifier: &'static str,
    requests: Quota,
    tokens: Quota,
}

const fn entry(
    short_name: &'static str,
    identifier: &'static str,
    requests: Quota,
    tokens: Quota,
) -> CatalogEntry {
    CatalogEntry {
        short_name,
        identifier,
        requests,
        tokens,
    }
}

#[rustfmt::skip]
static CATALOG: &[CatalogEntry] = &[
    entry("gpt-3.5", "gpt-3.5-turbo-0125", Quota::per_secs(500, 3), Quota::per_secs(500_000, 15)),
    entry("gpt-4", "gpt-4-0125-preview", Quota::per_secs(250, 3), Quota::per_secs(150_000, 15)),
    entry("gpt-4o-mini", "gpt-4o-mini-2024-07-18", Quota::per_secs(500, 3), Quota::per_secs(500_000, 15)),
    entry("gpt-4o", "gpt-4o-2024-05-13", Quota::per_secs(250, 3), Quota::per_secs(500_000, 15)),
    entry("mistral-7b", "mistral.mistral-7b-instruct-v0:2", Quota::per_secs(30, 5), Quota::per_secs(18_750, 5)),
    entry("mixtral-8x7b", "mistral.mixtral-8x7b-instruct-v0:1", Quota::per_secs(15, 5), Quota::per_secs(18_750, 5)),
    entry("claude-2", "anthropic.claude-v2:1", Quota::per_secs(5, 4), Quota::per_secs(12_500, 5)),
    entry("claude-sonnet-3.5", "anthropic.claude-3-5-sonnet-20240620-v1:0", Quota::per_secs(5, 6), Quota::per_secs(25_000, 5)),
    entry("claude-sonnet", "anthropic.claude-3-sonnet-20240229-v1:0", Quota::per_secs(5, 4), Quota::per_secs(12_500, 5)),
    entry("claude-haiku", "anthropic.claude-3-haiku-20240307-v1:0", Quota::per_secs(15, 5), Quota::per_secs(18_750, 5)),
    entry("claude-instant", "anthropic.claude-instant-v1", Quota::per_secs(15, 5), Quota::per_secs(18_750, 5)),
    entry("llama3-8b", "meta.llama3-1-8b-instruct-v1:0", Quota::per_secs(20, 3), Quota::per_secs(12_000, 3)),
    entry("llama3-70b", "meta.llama3-1-70b-instruct-v1:0", Quota::per_secs(10, 3), Quota::per_secs(12_000, 3)),
];

impl CatalogEntry {
    fn descriptor(&self) -> ModelDescriptor {
        ModelDescriptor::new(self.short_name, self.identifier, self.requests, self.tokens)
    }
}

/// Short names in catalog order.
pub fn short_names() -> Vec<&'static str> {
    CATALOG.iter().map(|e| e.short_name).collect()
}

/// Every catalog model as a descriptor.
pub fn all_models() -> Vec<ModelDescriptor> {
    CATALOG.iter().map(CatalogEntry::descriptor).collect()
}

/// Resolve a short name as typed on the command line.
pub fn resolve_model(short_name: &str) -> Result<ModelDescriptor, CatalogError> {
    CATALOG
        .iter()
        .find(|e| e.short_name == short_name)
        .map(CatalogEntry::descriptor)
        .ok_or_else(|| CatalogError::UnknownModel {
            name: short_name.to_string(),
            available: short_names(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_model() {
        let model = resolve_model("claude-haiku").unwrap();
        assert_eq!(model.identifier, "anthropic.claude-3-haiku-20240307-v1:0");
        assert_eq!(model.shape, ApiShape::Chat(ChatDialect::AnthropicMessages));
        assert_eq!(model.request_quota, Quota::per_secs(15, 5));
        assert_eq!(model.token_quota, Quota::per_secs(18_750, 5));
        assert_eq!(model.region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn test_resolve_unknown_model_lists_available() {
        let err = resolve_model("gpt-5").unwrap_err();
        let CatalogError::UnknownModel { name, available } = &err;
        assert_eq!(name, "gpt-5");
        assert_eq!(available.len(), 13);
        assert!(err.to_string().contains("llama3-70b"));
    }

    #[test]
    fn test_shape_routing_by_identifier() {
        assert_eq!(
            ApiShape::for_identifier("gpt-4o-mini-2024-07-18"),
            ApiShape::Chat(ChatDialect::OpenAi)
        );
        assert_eq!(
            ApiShape::for_identifier("anthropic.claude-v2:1"),
            ApiShape::LegacyCompletion(CompletionDialect::AnthropicText)
        );
        assert_eq!(
            ApiShape::for_identifier("anthropic.claude-instant-v1"),
            ApiShape::Chat(ChatDialect::AnthropicMessages)
        );
        assert_eq!(
            ApiShape::for_identifier("meta.llama3-1-70b-instruct-v1:0"),
            ApiShape::InstructModel
        );
        assert_eq!(
            ApiShape::for_identifier("mistral.mixtral-8x7b-instruct-v0:1"),
            ApiShape::LegacyCompletion(CompletionDialect::Mistral)
        );
        // Anything unrecognised falls through to the remaining Bedrock shape
        assert_eq!(
            ApiShape::for_identifier("cohere.command-r-v1:0"),
            ApiShape::LegacyCompletion(CompletionDialect::Mistral)
        );
    }

    #[test]
    fn test_backend_and_region() {
        let gpt = resolve_model("gpt-4o").unwrap();
        assert_eq!(gpt.backend(), Backend::OpenAi);
        assert!(gpt.region.is_none());

        let llama = resolve_model("llama3-8b").unwrap();
        assert_eq!(llama.backend(), Backend::Bedrock);
        assert_eq!(llama.region.as_deref(), Some("us-west-2"));

        let mistral = resolve_model("mistral-7b").unwrap();
        assert_eq!(mistral.region.as_deref(), Some("us-east-1"));
    }

    #[test]
    fn test_catalog_identifiers_are_unique() {
        let models = all_models();
        let mut ids: Vec<_> = models.iter().map(|m| m.identifier.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), models.len());
    }

    mod prop {
        use super::super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn gpt_identifiers_always_route_to_openai(prefix in "[a-z.\\-]{0,12}", suffix in "[a-z0-9.:\\-]{0,16}") {
                let id = format!("{prefix}gpt{suffix}");
                prop_assert_eq!(ApiShape::for_identifier(&id).backend(), Backend::OpenAi);
            }

            #[test]
            fn non_gpt_identifiers_route_to_bedrock(id in "[a-fh-z.:\\-]{1,40}") {
                prop_assert_eq!(ApiShape::for_identifier(&id).backend(), Backend::Bedrock);
            }
        }
    }
}
