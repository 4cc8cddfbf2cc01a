//! Pending-approval table shared between the orchestration loop and the
//! operator channels.
//!
//! Each outstanding tool call holds a single-slot wait point that is
//! fulfilled exactly once: the first `resolve` consumes the entry, a second
//! one reports `UnknownCallId`. Entries are owned by the operator connection
//! that surfaced them so a disconnect can force-deny exactly its own waits.

use std::collections::HashMap;
use std::sync::Mutex;

use proto::{ApprovalDecision, ApprovalError, ApprovalRequest, OperatorId};
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Denial reason used when the owning connection goes away mid-wait.
const ABANDON_REASON: &str = "connection lost";

struct PendingEntry {
    owner: OperatorId,
    tool_name: String,
    tx: oneshot::Sender<ApprovalDecision>,
}

/// Table of outstanding approval requests, keyed by tool-call id.
pub struct ApprovalGate {
    pending: Mutex<HashMap<String, PendingEntry>>,
}

/// Wait point for one pending call; consumed by awaiting the decision.
pub struct PendingApproval {
    rx: oneshot::Receiver<ApprovalDecision>,
}

impl PendingApproval {
    /// Suspends the calling task until the decision arrives.
    ///
    /// A dropped sender (gate torn down) reads as an abandoned denial, so
    /// the orchestration loop can never block forever.
    pub async fn decision(self) -> ApprovalDecision {
        self.rx
            .await
            .unwrap_or_else(|_| ApprovalDecision::deny(Some(ABANDON_REASON.to_string())))
    }
}

impl ApprovalGate {
    /// Creates an empty gate.
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a pending call owned by `owner` and returns its wait point.
    pub fn request(&self, owner: &OperatorId, req: &ApprovalRequest) -> PendingApproval {
        let (tx, rx) = oneshot::channel();
        let previous = self.pending.lock().expect("pending lock").insert(
            req.call_id.clone(),
            PendingEntry {
                owner: owner.clone(),
                tool_name: req.tool_name.clone(),
                tx,
            },
        );
        if previous.is_some() {
            warn!("Duplicate pending approval for call {}", req.call_id);
        }
        debug!(
            "Approval requested: call {} ({}) owned by {owner}",
            req.call_id, req.tool_name
        );
        PendingApproval { rx }
    }

    /// Delivers the decision for one pending call, consuming its entry.
    pub fn resolve(&self, call_id: &str, decision: ApprovalDecision) -> Result<(), ApprovalError> {
        match self.pending.lock().expect("pending lock").remove(call_id) {
            Some(entry) => {
                info!(
                    "Approval resolved: call {call_id} ({}) approved={}",
                    entry.tool_name, decision.approved
                );
                let _ = entry.tx.send(decision);
                Ok(())
            }
            None => Err(ApprovalError::UnknownCallId(call_id.to_string())),
        }
    }

    /// Force-denies every pending call owned by a disconnected operator.
    ///
    /// Returns how many waits were abandoned.
    pub fn abandon(&self, owner: &OperatorId) -> usize {
        let mut pending = self.pending.lock().expect("pending lock");
        let owned: Vec<String> = pending
            .iter()
            .filter(|(_, entry)| entry.owner == *owner)
            .map(|(call_id, _)| call_id.clone())
            .collect();

        for call_id in &owned {
            if let Some(entry) = pending.remove(call_id) {
                let _ = entry
                    .tx
                    .send(ApprovalDecision::deny(Some(ABANDON_REASON.to_string())));
            }
        }

        if !owned.is_empty() {
            warn!("Abandoned {} pending approvals for {owner}", owned.len());
        }
        owned.len()
    }

    /// Number of outstanding waits.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock").len()
    }
}

impl Default for ApprovalGate {
    fn default() -> Self {
        Self::new()
    }
}
