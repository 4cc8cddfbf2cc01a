//! Progress events and scheduled-prompt records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Real-time progress events emitted while the orchestration loop runs.
///
/// Sent over `tokio::sync::mpsc` so an operator channel can mirror live
/// tool-call status to its client while a turn is in flight.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The call was approved and dispatched to its provider.
    ToolExecuting { call_id: String, tool_name: String },
    /// The provider returned a successful result.
    ToolSucceeded { call_id: String, tool_name: String },
    /// The invocation faulted; the loop continues with a synthesized result.
    ToolFailed {
        call_id: String,
        tool_name: String,
        error: String,
    },
    /// The operator denied the call.
    ToolDenied {
        call_id: String,
        tool_name: String,
        reason: Option<String>,
    },
}

/// Origin of a scheduled prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptKind {
    /// Fired by a timer or other system trigger.
    SystemTrigger,
    /// Observation logged by an automated watcher for the agent to relay.
    DeveloperObservation,
}

impl PromptKind {
    /// Conversation role a prompt of this kind is injected under.
    pub fn role(self) -> crate::Role {
        match self {
            PromptKind::SystemTrigger => crate::Role::System,
            PromptKind::DeveloperObservation => crate::Role::Developer,
        }
    }
}

/// A system-originated conversational turn waiting in the durable queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPrompt {
    /// Prompt text handed to the orchestration loop.
    pub text: String,
    /// Trigger origin, which selects the injected role.
    pub kind: PromptKind,
    /// When the prompt was enqueued, UTC.
    pub enqueued_at: DateTime<Utc>,
}

impl ScheduledPrompt {
    /// Creates a prompt enqueued now.
    pub fn new(text: impl Into<String>, kind: PromptKind) -> Self {
        Self {
            text: text.into(),
            kind,
            enqueued_at: Utc::now(),
        }
    }
}
