//! # audit-runtime
//!
//! The I/O side of the hiring audit: provider transports, rate budgets,
//! retry, batch dispatch and the SQLite result store.
//!
//! ## Features
//!
//! - `openai`: OpenAI chat completions over `reqwest`
//! - `bedrock`: AWS Bedrock `InvokeModel`
//! - `tiktoken`: exact BPE token counts for OpenAI models
//! - `all-providers`: all of the above
//!
//! ## Example
//!
//! ```rust,ignore
//! use audit_runtime::{create_adapter, Dispatcher, RateBudgets, RuntimeConfig, SqliteStore};
//!
//! let config = RuntimeConfig::default();
//! let model = audit_core::resolve_model("claude-haiku")?;
//! let store = Arc::new(SqliteStore::open(&config.database)?);
//! let prompts = store.pending_prompts("gender", &model.identifier, 100).await?;
//!
//! let dispatcher = Dispatcher::builder()
//!     .adapter(create_adapter(&model, &config).await?)
//!     .model(model)
//!     .budgets(Arc::new(RateBudgets::from_catalog(config.max_connections)))
//!     .sink(store)
//!     .retry_policy(config.retry.clone())
//!     .build()?;
//!
//! let report = dispatcher.dispatch(prompts).await;
//! ```

pub mod config;
pub mod dispatcher;
pub mod providers;
pub mod resilience;
pub mod store;

pub use config::{ConfigError, OpenAiConfig, RuntimeConfig};
pub use dispatcher::{BatchReport, DispatchError, Dispatcher, DispatcherBuilder};
pub use providers::{
    create_adapter, estimate_tokens, ApiCredential, FailureKind, ProviderAdapter, ProviderError,
};
pub use resilience::{
    BudgetUsage, InvokeError, ModelBudget, RateBudgets, RateLimiter, RetryPolicy, RetryingInvoker,
};
pub use store::{OutcomeSink, PromptSource, SqliteStore, StoreError};
