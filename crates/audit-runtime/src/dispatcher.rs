//! Batch dispatch of prompts to one model.
//!
//! The dispatcher manages the fan-out of a batch:
//! - One tokio task per prompt, collected through a `JoinSet`
//! - A shared semaphore caps calls in flight across every dispatcher
//! - Each task writes exactly one outcome row, success or failure
//!
//! A failed prompt never aborts the batch. Prompts whose outcome could not be
//! written are counted as `unrecorded` and will be selected again next run.

use std::sync::Arc;

use audit_core::{DispatchState, ModelDescriptor, Outcome, Prompt};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, Instrument};

use crate::providers::ProviderAdapter;
use crate::resilience::{RateBudgets, RetryPolicy, RetryingInvoker};
use crate::store::OutcomeSink;

/// Errors building a dispatcher.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Dispatcher not configured: {0}")]
    NotConfigured(String),

    #[error("No rate budget registered for model {0}")]
    UnknownModel(String),
}

/// Tally for one `dispatch` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unrecorded: usize,
}

enum TaskResult {
    Recorded(DispatchState),
    Unrecorded,
}

/// Sends prompts to one model and records an outcome per prompt.
pub struct Dispatcher {
    invoker: RetryingInvoker,
    connections: Arc<Semaphore>,
    sink: Arc<dyn OutcomeSink>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::new()
    }

    pub fn model(&self) -> &ModelDescriptor {
        self.invoker.model()
    }

    /// Dispatch every prompt concurrently and wait for all of them.
    pub async fn dispatch(&self, prompts: Vec<Prompt>) -> BatchReport {
        let mut report = BatchReport {
            total: prompts.len(),
            ..BatchReport::default()
        };
        let model = self.model().short_name.clone();
        info!(model = %model, prompts = report.total, "Dispatching batch");

        let mut tasks = JoinSet::new();
        for prompt in prompts {
            let span = tracing::info_span!("prompt", prompt_id = prompt.id, model = %model);
            tasks.spawn(
                run_one(
                    prompt,
                    self.invoker.clone(),
                    self.connections.clone(),
                    self.sink.clone(),
                )
                .instrument(span),
            );
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(TaskResult::Recorded(DispatchState::Succeeded)) => report.succeeded += 1,
                Ok(TaskResult::Recorded(_)) => report.failed += 1,
                Ok(TaskResult::Unrecorded) => report.unrecorded += 1,
                Err(e) => {
                    error!(error = %e, "Dispatch task aborted");
                    report.unrecorded += 1;
                }
            }
        }

        info!(
            model = %model,
            succeeded = report.succeeded,
            failed = report.failed,
            unrecorded = report.unrecorded,
            "Batch complete"
        );
        report
    }
}

async fn run_one(
    prompt: Prompt,
    invoker: RetryingInvoker,
    connections: Arc<Semaphore>,
    sink: Arc<dyn OutcomeSink>,
) -> TaskResult {
    debug!(state = %DispatchState::Pending, "Queued");

    let result = {
        let _permit = match connections.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(error = %e, "Connection limiter closed");
                return TaskResult::Unrecorded;
            }
        };
        invoker.call(&prompt.system_message, &prompt.body).await
    };

    let identifier = invoker.model().identifier.clone();
    let outcome = match result {
        Ok(text) => Outcome::succeeded(prompt.id, identifier, text),
        Err(e) => {
            error!(attempts = e.attempts, kind = ?e.kind, error = %e.source, "Prompt failed");
            Outcome::failed(prompt.id, identifier, e.source.to_string())
        }
    };

    match sink.record(&outcome).await {
        Ok(()) => {
            let state = outcome.state();
            debug!(state = %state, "Outcome recorded");
            TaskResult::Recorded(state)
        }
        Err(e) => {
            error!(error = %e, "Failed to record outcome");
            TaskResult::Unrecorded
        }
    }
}

/// Builder for [`Dispatcher`].
pub struct DispatcherBuilder {
    model: Option<ModelDescriptor>,
    adapter: Option<Arc<dyn ProviderAdapter>>,
    budgets: Option<Arc<RateBudgets>>,
    sink: Option<Arc<dyn OutcomeSink>>,
    retry_policy: RetryPolicy,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self {
            model: None,
            adapter: None,
            budgets: None,
            sink: None,
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn model(mut self, model: ModelDescriptor) -> Self {
        self.model = Some(model);
        self
    }

    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Rate budgets shared with every other dispatcher in the process.
    pub fn budgets(mut self, budgets: Arc<RateBudgets>) -> Self {
        self.budgets = Some(budgets);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn OutcomeSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn build(self) -> Result<Dispatcher, DispatchError> {
        let model = self
            .model
            .ok_or_else(|| DispatchError::NotConfigured("No model set".to_string()))?;
        let adapter = self
            .adapter
            .ok_or_else(|| DispatchError::NotConfigured("No adapter set".to_string()))?;
        let budgets = self
            .budgets
            .ok_or_else(|| DispatchError::NotConfigured("No rate budgets set".to_string()))?;
        let sink = self
            .sink
            .ok_or_else(|| DispatchError::NotConfigured("No outcome sink set".to_string()))?;
        if self.retry_policy.max_retries == 0 {
            return Err(DispatchError::NotConfigured(
                "retry policy must allow at least one attempt".to_string(),
            ));
        }

        let budget = budgets
            .model(&model.identifier)
            .ok_or_else(|| DispatchError::UnknownModel(model.identifier.clone()))?;

        Ok(Dispatcher {
            invoker: RetryingInvoker::new(adapter, Arc::new(model), budget, self.retry_policy),
            connections: budgets.connections(),
            sink,
        })
    }
}

impl Default for DispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderError;
    use crate::store::{PromptSource, SqliteStore, StoreError};
    use async_trait::async_trait;
    use audit_core::resolve_model;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Echoes the prompt, or fails permanently when it contains "fail".
    struct EchoAdapter;

    #[async_trait]
    impl ProviderAdapter for EchoAdapter {
        async fn invoke(
            &self,
            _model: &ModelDescriptor,
            _system_message: &str,
            prompt: &str,
        ) -> Result<String, ProviderError> {
            if prompt.contains("fail") {
                Err(ProviderError::ApiError {
                    status: 400,
                    message: "bad prompt".to_string(),
                })
            } else {
                Ok(format!("echo: {prompt}"))
            }
        }

        fn name(&self) -> &str {
            "echo"
        }
    }

    /// Tracks the highest number of concurrent calls.
    #[derive(Default)]
    struct GaugeAdapter {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ProviderAdapter for GaugeAdapter {
        async fn invoke(
            &self,
            _model: &ModelDescriptor,
            _system_message: &str,
            _prompt: &str,
        ) -> Result<String, ProviderError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok("ok".to_string())
        }

        fn name(&self) -> &str {
            "gauge"
        }
    }

    #[derive(Default)]
    struct MemorySink {
        outcomes: Mutex<Vec<Outcome>>,
    }

    #[async_trait]
    impl OutcomeSink for MemorySink {
        async fn record(&self, outcome: &Outcome) -> Result<(), StoreError> {
            self.outcomes.lock().push(outcome.clone());
            Ok(())
        }
    }

    /// Rejects writes for one prompt id.
    struct FlakySink {
        reject: i64,
        inner: MemorySink,
    }

    #[async_trait]
    impl OutcomeSink for FlakySink {
        async fn record(&self, outcome: &Outcome) -> Result<(), StoreError> {
            if outcome.prompt_id == self.reject {
                return Err(StoreError::Task("disk full".to_string()));
            }
            self.inner.record(outcome).await
        }
    }

    fn dispatcher(
        short_name: &str,
        adapter: Arc<dyn ProviderAdapter>,
        sink: Arc<dyn OutcomeSink>,
        connections: usize,
    ) -> Dispatcher {
        Dispatcher::builder()
            .model(resolve_model(short_name).unwrap())
            .adapter(adapter)
            .budgets(Arc::new(RateBudgets::from_catalog(connections)))
            .sink(sink)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_one_row_per_prompt_with_failure() {
        let store = SqliteStore::open_in_memory().unwrap();
        for body in ["first", "please fail", "third"] {
            store.insert_prompt("gender", "sys", body).await.unwrap();
        }
        let model = resolve_model("gpt-4o").unwrap();
        let prompts = store
            .pending_prompts("gender", &model.identifier, 100)
            .await
            .unwrap();

        let store = Arc::new(store);
        let dispatcher = dispatcher("gpt-4o", Arc::new(EchoAdapter), store.clone(), 100);
        let report = dispatcher.dispatch(prompts).await;

        assert_eq!(
            report,
            BatchReport {
                total: 3,
                succeeded: 2,
                failed: 1,
                unrecorded: 0
            }
        );

        let outcomes = store.outcomes(&model.identifier).await.unwrap();
        assert_eq!(outcomes.len(), 3);
        assert_eq!(outcomes[0].raw_response.as_deref(), Some("echo: first"));
        assert!(outcomes[1].error);
        assert!(outcomes[1]
            .error_message
            .as_deref()
            .unwrap()
            .contains("bad prompt"));
        assert_eq!(outcomes[2].raw_response.as_deref(), Some("echo: third"));

        // Nothing is left to select on the next run
        let pending = store
            .pending_prompts("gender", &model.identifier, 100)
            .await
            .unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connection_cap_bounds_in_flight() {
        let adapter = Arc::new(GaugeAdapter::default());
        let sink = Arc::new(MemorySink::default());
        let dispatcher = dispatcher("gpt-3.5", adapter.clone(), sink.clone(), 100);

        let prompts = (0..500).map(|i| Prompt::new(i, "sys", "hi")).collect();
        let report = dispatcher.dispatch(prompts).await;

        assert_eq!(report.succeeded, 500);
        let peak = adapter.peak.load(Ordering::SeqCst);
        assert!(peak <= 100, "peak in flight {peak}");
        assert!(peak > 1, "calls never overlapped");
        assert_eq!(sink.outcomes.lock().len(), 500);
    }

    #[tokio::test]
    async fn test_sink_failure_is_unrecorded_not_fatal() {
        let sink = Arc::new(FlakySink {
            reject: 2,
            inner: MemorySink::default(),
        });
        let dispatcher = dispatcher("mistral-7b", Arc::new(EchoAdapter), sink.clone(), 10);

        let prompts = (1..=4).map(|i| Prompt::new(i, "sys", "hello")).collect();
        let report = dispatcher.dispatch(prompts).await;

        assert_eq!(report.total, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.unrecorded, 1);
        let mut ids: Vec<_> = sink.inner.outcomes.lock().iter().map(|o| o.prompt_id).collect();
        ids.sort();
        assert_eq!(ids, vec![1, 3, 4]);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dispatcher = dispatcher(
            "claude-haiku",
            Arc::new(EchoAdapter),
            Arc::new(MemorySink::default()),
            100,
        );
        assert_eq!(dispatcher.dispatch(Vec::new()).await, BatchReport::default());
    }

    #[test]
    fn test_builder_requires_budget_for_model() {
        let mut model = resolve_model("gpt-4o").unwrap();
        model.identifier = "gpt-4o-unlisted".to_string();

        let result = Dispatcher::builder()
            .model(model)
            .adapter(Arc::new(EchoAdapter))
            .budgets(Arc::new(RateBudgets::from_catalog(100)))
            .sink(Arc::new(MemorySink::default()))
            .build();
        assert!(matches!(result, Err(DispatchError::UnknownModel(_))));
    }

    #[test]
    fn test_builder_requires_adapter() {
        let result = Dispatcher::builder()
            .model(resolve_model("gpt-4o").unwrap())
            .budgets(Arc::new(RateBudgets::from_catalog(100)))
            .sink(Arc::new(MemorySink::default()))
            .build();
        assert!(matches!(result, Err(DispatchError::NotConfigured(_))));
    }

    #[test]
    fn test_builder_rejects_zero_attempt_policy() {
        let result = Dispatcher::builder()
            .model(resolve_model("gpt-4o").unwrap())
            .adapter(Arc::new(EchoAdapter))
            .budgets(Arc::new(RateBudgets::from_catalog(100)))
            .sink(Arc::new(MemorySink::default()))
            .retry_policy(RetryPolicy {
                max_retries: 0,
                ..RetryPolicy::default()
            })
            .build();
        assert!(matches!(result, Err(DispatchError::NotConfigured(_))));
    }
}
