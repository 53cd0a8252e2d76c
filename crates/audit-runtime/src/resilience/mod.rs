//! Rate limiting and retry for audit-runtime.
//!
//! This module provides:
//! - Leaky-bucket limiters on the tokio clock
//! - Per-model request and token budgets plus the shared connection cap
//! - Retry with exponential backoff

mod budget;
mod limiter;
mod retry;

pub use budget::{BudgetUsage, ModelBudget, RateBudgets};
pub use limiter::RateLimiter;
pub use retry::{InvokeError, RetryPolicy, RetryingInvoker};
