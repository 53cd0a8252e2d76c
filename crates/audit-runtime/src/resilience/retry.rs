//! Budgeted calls with exponential backoff.
//!
//! One logical call charges the token budget once, then takes one request
//! unit per attempt. Transient failures back off `base, 2*base, 4*base, ...`
//! capped at `max_delay`; the delay is slept after every transient failure,
//! including the last one, before the error is surfaced.

use audit_core::{DispatchState, ModelDescriptor};
use backon::{BackoffBuilder, ExponentialBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::ModelBudget;
use crate::config::duration_human;
use crate::providers::{FailureKind, ProviderAdapter, ProviderError};

/// Attempt count and backoff shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first
    pub max_retries: u32,

    #[serde(with = "duration_human")]
    pub base_delay: Duration,

    #[serde(with = "duration_human")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    /// Backoff delays, one per attempt.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        ExponentialBuilder::default()
            .with_min_delay(self.base_delay)
            .with_max_delay(self.max_delay)
            .with_factor(2.0)
            .with_max_times(self.max_retries as usize)
            .build()
    }
}

/// A call that ended in failure.
#[derive(Error, Debug)]
#[error("{source} (after {attempts} attempt(s))")]
pub struct InvokeError {
    pub kind: FailureKind,
    pub attempts: u32,
    #[source]
    pub source: ProviderError,
}

/// Runs calls for one model through its budget and the retry policy.
#[derive(Clone)]
pub struct RetryingInvoker {
    adapter: Arc<dyn ProviderAdapter>,
    model: Arc<ModelDescriptor>,
    budget: ModelBudget,
    policy: RetryPolicy,
}

impl RetryingInvoker {
    pub fn new(
        adapter: Arc<dyn ProviderAdapter>,
        model: Arc<ModelDescriptor>,
        budget: ModelBudget,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            adapter,
            model,
            budget,
            policy,
        }
    }

    pub fn model(&self) -> &ModelDescriptor {
        &self.model
    }

    /// Send one prompt, retrying transient failures.
    ///
    /// A policy with `max_retries == 0` allows no attempts and fails
    /// without touching the budget or the adapter.
    pub async fn call(&self, system_message: &str, prompt: &str) -> Result<String, InvokeError> {
        if self.policy.max_retries == 0 {
            return Err(InvokeError {
                kind: FailureKind::Permanent,
                attempts: 0,
                source: ProviderError::NotConfigured(
                    "retry policy allows no attempts".to_string(),
                ),
            });
        }

        let tokens = self
            .adapter
            .estimate_tokens(&self.model, system_message, prompt);

        debug!(state = %DispatchState::RateLimited, tokens, "Waiting for token budget");
        self.budget.tokens.acquire(tokens).await;

        let mut delays = self.policy.delays();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            self.budget.requests.acquire(1).await;

            debug!(state = %DispatchState::InFlight, attempt = attempts, "Invoking model");
            let error = match self
                .adapter
                .invoke(&self.model, system_message, prompt)
                .await
            {
                Ok(text) => return Ok(text),
                Err(e) => e,
            };

            let kind = error.kind();
            if kind == FailureKind::Permanent {
                return Err(InvokeError {
                    kind,
                    attempts,
                    source: error,
                });
            }
            let last = attempts >= self.policy.max_retries;

            let backoff = delays.next().unwrap_or(self.policy.max_delay);
            let wait = match &error {
                ProviderError::RateLimited {
                    retry_after: Some(after),
                } => backoff.max(*after),
                _ => backoff,
            };
            warn!(
                model = %self.model.short_name,
                attempt = attempts,
                wait = ?wait,
                error = %error,
                "Transient provider error, backing off"
            );
            tokio::time::sleep(wait).await;

            if last {
                return Err(InvokeError {
                    kind,
                    attempts,
                    source: error,
                });
            }
        }
    }
}
