//! Token estimates used for budget acquisition.
//!
//! OpenAI models get an exact BPE count when the `tiktoken` feature is on.
//! Everything else is charged `(chars(prompt) + chars(system)) / 4`. These
//! numbers only gate the token limiter; they are not used for billing.

use audit_core::{ApiShape, ChatDialect, ModelDescriptor};

/// Character-count estimate: four characters per token, rounded down.
pub fn approximate_tokens(system_message: &str, prompt: &str) -> u32 {
    let chars = prompt.chars().count() + system_message.chars().count();
    u32::try_from(chars / 4).unwrap_or(u32::MAX)
}

/// Token cost of one call to `model`.
pub fn estimate_tokens(model: &ModelDescriptor, system_message: &str, prompt: &str) -> u32 {
    match model.shape {
        ApiShape::Chat(ChatDialect::OpenAi) => exact::count(&model.identifier, system_message, prompt)
            .unwrap_or_else(|| approximate_tokens(system_message, prompt)),
        _ => approximate_tokens(system_message, prompt),
    }
}

#[cfg(feature = "tiktoken")]
mod exact {
    use std::sync::OnceLock;
    use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};
    use tracing::warn;

    static O200K: OnceLock<Option<CoreBPE>> = OnceLock::new();
    static CL100K: OnceLock<Option<CoreBPE>> = OnceLock::new();

    fn load<E: std::fmt::Display>(name: &str, result: Result<CoreBPE, E>) -> Option<CoreBPE> {
        match result {
            Ok(bpe) => Some(bpe),
            Err(e) => {
                warn!(encoding = name, error = %e, "Failed to load BPE, using character estimate");
                None
            }
        }
    }

    fn encoding_for(identifier: &str) -> Option<&'static CoreBPE> {
        if identifier.contains("gpt-4o") {
            O200K
                .get_or_init(|| load("o200k_base", o200k_base()))
                .as_ref()
        } else {
            CL100K
                .get_or_init(|| load("cl100k_base", cl100k_base()))
                .as_ref()
        }
    }

    pub fn count(identifier: &str, system_message: &str, prompt: &str) -> Option<u32> {
        let bpe = encoding_for(identifier)?;
        let tokens = bpe.encode_ordinary(prompt).len()
            + bpe.encode_ordinary(system_message).len();
        Some(u32::try_from(tokens).unwrap_or(u32::MAX))
    }
}

#[cfg(not(feature = "tiktoken"))]
mod exact {
    pub fn count(_identifier: &str, _system_message: &str, _prompt: &str) -> Option<u32> {
        None
    }
}
