//! Tool call approval handshake shared across channels and the runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A request for operator approval before executing a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Tool-call identifier from the model.
    pub call_id: String,
    /// Qualified name of the tool to be executed.
    pub tool_name: String,
    /// JSON arguments for the tool call.
    pub arguments: serde_json::Value,
}

/// Operator's decision on one tool call.
///
/// The optional reason accompanies denials and is fed back to the model as
/// tool output so it can adapt its next turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// Whether the call may execute.
    pub approved: bool,
    /// Optional operator-supplied reason, meaningful on denial.
    pub reason: Option<String>,
}

impl ApprovalDecision {
    /// An affirmative decision.
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    /// A denial, optionally carrying the operator's reason.
    pub fn deny(reason: Option<String>) -> Self {
        Self {
            approved: false,
            reason: reason.filter(|r| !r.trim().is_empty()),
        }
    }
}

/// Handler consulted by the orchestration loop before every tool execution.
///
/// Implementations present the request to whoever owns the conversation —
/// a WebSocket operator, a console prompt — and suspend until a decision
/// arrives. [`AutoApprove`] short-circuits the wait for system-originated
/// turns that have no attached operator.
#[async_trait]
pub trait ApprovalHandler: Send + Sync {
    /// Requests a decision for one tool call, suspending until it resolves.
    async fn request_approval(&self, req: ApprovalRequest) -> ApprovalDecision;
}

/// Approval handler that approves every call without asking.
pub struct AutoApprove;

#[async_trait]
impl ApprovalHandler for AutoApprove {
    async fn request_approval(&self, _req: ApprovalRequest) -> ApprovalDecision {
        ApprovalDecision::approve()
    }
}
