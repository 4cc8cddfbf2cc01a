//! Shared protocol types for the orchestration runtime, tool providers, and
//! operator channels.
//!
//! This crate defines serializable message/tool/approval/prompt structures,
//! the collaborator traits the orchestration loop is written against, and
//! strongly-typed error enums shared across the workspace.

pub mod approval;
pub mod error;
pub mod event;
pub mod message;
pub mod tool;

/// Re-export of the approval handshake contract.
pub use approval::{ApprovalDecision, ApprovalHandler, ApprovalRequest, AutoApprove};
/// Re-export of all protocol error types.
pub use error::*;
/// Re-export of progress/scheduled-prompt event types.
pub use event::{ProgressEvent, PromptKind, ScheduledPrompt};
/// Re-export of conversation/message identity types.
pub use message::{AgentMessage, OperatorId, Role, SessionId};
/// Re-export of tool call, definition, and result types.
pub use tool::{ToolBroker, ToolCall, ToolDefinition, ToolResult};
