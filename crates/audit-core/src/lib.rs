//! # audit-core
//!
//! Domain types for the LLM interview audit.
//!
//! This crate holds the records that flow through the dispatcher and the
//! static catalog of models under audit. It performs no I/O; the network,
//! storage and rate-limiting live in `audit-runtime`.
//!
//! ## Example
//!
//! ```rust
//! use audit_core::{resolve_model, ApiShape, ChatDialect};
//!
//! let model = resolve_model("gpt-4o-mini").unwrap();
//! assert_eq!(model.identifier, "gpt-4o-mini-2024-07-18");
//! assert_eq!(model.shape, ApiShape::Chat(ChatDialect::OpenAi));
//! ```

pub mod catalog;
pub mod types;

// Re-export main types at crate root
pub use catalog::{
    all_models, resolve_model, short_names, ApiShape, Backend, CatalogError,
    ChatDialect, CompletionDialect, ModelDescriptor, Quota, CONNECTION_LIMIT,
};
pub use types::{DispatchState, Outcome, Prompt, PromptId};
