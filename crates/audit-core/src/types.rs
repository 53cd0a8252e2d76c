//! Records that cross the dispatcher boundary.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Row identifier of a prompt in the `prompts` table.
pub type PromptId = i64;

/// A prompt produced by the prompt-generation step.
///
/// Read-only to the dispatcher: it is loaded from storage and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: PromptId,
    pub system_message: String,
    pub body: String,
}

impl Prompt {
    pub fn new(id: PromptId, system_message: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            system_message: system_message.into(),
            body: body.into(),
        }
    }
}

/// The persisted result of dispatching one prompt to one model.
///
/// Written exactly once per (prompt, model) pair. `raw_response` is set only
/// on success; `error_message` only on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub prompt_id: PromptId,
    pub model: String,
    pub raw_response: Option<String>,
    pub error: bool,
    pub error_message: Option<String>,
}

impl Outcome {
    /// Outcome for a call that returned text (possibly empty).
    pub fn succeeded(prompt_id: PromptId, model: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            prompt_id,
            model: model.into(),
            raw_response: Some(text.into()),
            error: false,
            error_message: None,
        }
    }

    /// Outcome for a call that ended in a surfaced provider error.
    pub fn failed(prompt_id: PromptId, model: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            prompt_id,
            model: model.into(),
            raw_response: None,
            error: true,
            error_message: Some(message.into()),
        }
    }

    /// Terminal state this outcome represents.
    pub fn state(&self) -> DispatchState {
        if self.error {
            DispatchState::Failed
        } else {
            DispatchState::Succeeded
        }
    }
}

/// Lifecycle of a single prompt dispatch.
///
/// Retries happen inside `InFlight`; they are not a separate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchState {
    Pending,
    RateLimited,
    InFlight,
    Succeeded,
    Failed,
}

impl DispatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for DispatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::RateLimited => "RATE_LIMITED",
            Self::InFlight => "IN_FLIGHT",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}
