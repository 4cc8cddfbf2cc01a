//! Process-wide coordination: the approval gate, per-conversation turn
//! serialization, and the durable scheduled-prompt queue.

pub mod approval;
pub mod dispatcher;
pub mod scheduler;

/// Pending-approval table with exactly-once resolution.
pub use approval::{ApprovalGate, PendingApproval};
/// Per-conversation turn serialization.
pub use dispatcher::TurnDispatcher;
/// Durable FIFO of system-originated prompts.
pub use scheduler::PromptQueue;
