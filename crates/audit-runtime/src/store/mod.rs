//! Persistence of prompts and dispatch outcomes.
//!
//! The dispatcher writes through [`OutcomeSink`]; the CLI selects work
//! through [`PromptSource`]. [`SqliteStore`] implements both.

use async_trait::async_trait;
use audit_core::{Outcome, Prompt, PromptId};
use thiserror::Error;

mod sqlite;

pub use sqlite::SqliteStore;

/// Errors from the result store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Store task failed: {0}")]
    Task(String),

    #[error("Outcome already recorded for prompt {prompt_id} on {model}")]
    Duplicate { prompt_id: PromptId, model: String },
}

/// Destination for finished dispatches.
#[async_trait]
pub trait OutcomeSink: Send + Sync {
    /// Persist one outcome. Each (prompt, model) pair is written at most once.
    async fn record(&self, outcome: &Outcome) -> Result<(), StoreError>;
}

/// Source of prompts still waiting for a model.
#[async_trait]
pub trait PromptSource: Send + Sync {
    /// Prompts of `experiment` with no outcome for `model`, ordered by id,
    /// at most `limit` of them.
    async fn pending_prompts(
        &self,
        experiment: &str,
        model: &str,
        limit: usize,
    ) -> Result<Vec<Prompt>, StoreError>;
}
