//! Per-model rate budgets and the shared connection cap.
//!
//! A [`RateBudgets`] value is built once per process and handed to every
//! dispatcher that needs it. Two dispatchers for the same model share the
//! same limiters because they share the same `RateBudgets`.

use audit_core::{all_models, ModelDescriptor};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

use super::RateLimiter;

/// Request and token limiters for one model.
#[derive(Debug, Clone)]
pub struct ModelBudget {
    pub requests: Arc<RateLimiter>,
    pub tokens: Arc<RateLimiter>,
}

impl ModelBudget {
    pub fn for_model(model: &ModelDescriptor) -> Self {
        Self {
            requests: Arc::new(RateLimiter::new(model.request_quota)),
            tokens: Arc::new(RateLimiter::new(model.token_quota)),
        }
    }
}

/// Units handed out by one model's limiters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BudgetUsage {
    pub requests: u64,
    pub tokens: u64,
}

/// All rate budgets for a process.
#[derive(Debug)]
pub struct RateBudgets {
    models: HashMap<String, ModelBudget>,
    connections: Arc<Semaphore>,
    connection_limit: usize,
}

impl RateBudgets {
    /// Budgets for `models`, keyed by identifier.
    pub fn new<'a>(
        models: impl IntoIterator<Item = &'a ModelDescriptor>,
        connection_limit: usize,
    ) -> Self {
        let models = models
            .into_iter()
            .map(|m| (m.identifier.clone(), ModelBudget::for_model(m)))
            .collect();

        Self {
            models,
            connections: Arc::new(Semaphore::new(connection_limit)),
            connection_limit,
        }
    }

    /// Budgets for every catalog model.
    pub fn from_catalog(connection_limit: usize) -> Self {
        Self::new(all_models().iter(), connection_limit)
    }

    pub fn model(&self, identifier: &str) -> Option<ModelBudget> {
        self.models.get(identifier).cloned()
    }

    pub fn connections(&self) -> Arc<Semaphore> {
        self.connections.clone()
    }

    pub fn connection_limit(&self) -> usize {
        self.connection_limit
    }

    /// Units acquired so far for one model.
    pub fn usage(&self, identifier: &str) -> Option<BudgetUsage> {
        self.models.get(identifier).map(|b| BudgetUsage {
            requests: b.requests.acquired(),
            tokens: b.tokens.acquired(),
        })
    }
}
