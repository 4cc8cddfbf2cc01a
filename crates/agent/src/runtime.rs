//! Bounded orchestration loop: model call → approval gate → tool dispatch.

use std::sync::Arc;

use proto::{
    AgentMessage, ApprovalHandler, ApprovalRequest, AutoApprove, ProgressEvent, Role,
    ScheduledPrompt, SessionId, ToolBroker, ToolCall, ToolResult,
};
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::llm::{ChatMessage, ChatRequest, ChatResponse, LlmProvider};
use crate::store::TranscriptStore;

const DEFAULT_SYSTEM_PROMPT: &str = "You are tollgate, a companion assistant. \
You can call tools exposed by connected providers; every call is shown to the \
user for approval first. Be helpful and concise.";

/// Reply returned (and persisted) when the loop hits its iteration cap.
pub const ITERATION_CAP_REPLY: &str = "Maximum iterations reached. Please try again";

/// The orchestration loop.
///
/// One instance serves every conversation; callers serialize turns per
/// session key (see the gateway dispatcher). A single turn repeatedly calls
/// the model and dispatches the tool calls it emits, in emission order, until
/// the model produces a final answer or the iteration cap trips.
pub struct AgentRuntime {
    llm: Arc<dyn LlmProvider>,
    broker: Arc<dyn ToolBroker>,
    store: Arc<TranscriptStore>,
    model: String,
    system_prompt: String,
    max_iterations: usize,
    history_window: usize,
}

impl AgentRuntime {
    /// Creates a runtime over the given collaborators.
    pub fn new(
        llm: Arc<dyn LlmProvider>,
        broker: Arc<dyn ToolBroker>,
        store: Arc<TranscriptStore>,
        model: impl Into<String>,
        max_iterations: usize,
        history_window: usize,
    ) -> Self {
        Self {
            llm,
            broker,
            store,
            model: model.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations,
            history_window,
        }
    }

    /// Replaces the system preamble.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Transcript store this runtime appends to.
    pub fn store(&self) -> &Arc<TranscriptStore> {
        &self.store
    }

    /// Runs one user turn: persist the input, then loop to a final reply.
    pub async fn run_user_turn(
        &self,
        session_id: &SessionId,
        channel: &str,
        text: &str,
        approval: &Arc<dyn ApprovalHandler>,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<String, proto::Error> {
        self.store
            .ensure_session(session_id, channel)
            .await
            .map_err(proto::Error::Database)?;

        let user_msg = AgentMessage::new(session_id.clone(), Role::User, text);
        self.store
            .append(&user_msg)
            .await
            .map_err(proto::Error::Database)?;

        self.run_loop(session_id, None, approval, progress).await
    }

    /// Runs a scheduled system/developer turn in auto-approve mode.
    ///
    /// The trigger text rides in memory only; the transcript records just the
    /// assistant's reply.
    pub async fn run_scheduled_turn(
        &self,
        session_id: &SessionId,
        channel: &str,
        prompt: &ScheduledPrompt,
    ) -> Result<String, proto::Error> {
        self.store
            .ensure_session(session_id, channel)
            .await
            .map_err(proto::Error::Database)?;

        info!("Scheduled {} turn: {}", prompt.kind.role(), prompt.text);
        let transient = AgentMessage::new(session_id.clone(), prompt.kind.role(), &prompt.text);
        let auto: Arc<dyn ApprovalHandler> = Arc::new(AutoApprove);
        self.run_loop(session_id, Some(transient), &auto, None).await
    }

    /// The state machine: AwaitingModel → (Finished | DispatchingTools) → …
    async fn run_loop(
        &self,
        session_id: &SessionId,
        transient: Option<AgentMessage>,
        approval: &Arc<dyn ApprovalHandler>,
        progress: Option<mpsc::Sender<ProgressEvent>>,
    ) -> Result<String, proto::Error> {
        let history = self
            .store
            .recent(session_id, self.history_window)
            .await
            .map_err(proto::Error::Database)?;
        let mut messages = build_transcript(&self.system_prompt, &history, transient.as_ref());

        let tool_defs = self.broker.catalog();

        for round in 0..self.max_iterations {
            debug!("Model call (round {round}) for session {session_id}");
            let req = ChatRequest {
                messages: messages.clone(),
                tools: tool_defs.clone(),
                model: self.model.clone(),
            };
            // Only a model transport failure aborts the turn.
            let response = self.llm.chat(req).await.map_err(proto::Error::Llm)?;

            match response {
                ChatResponse::Text(text) => {
                    info!("Final reply for session {session_id} after {round} tool rounds");
                    self.persist_assistant(session_id, &text).await?;
                    return Ok(text);
                }
                ChatResponse::ToolCalls(tool_calls) => {
                    debug!(
                        "Tool calls requested: {:?}",
                        tool_calls.iter().map(|tc| &tc.name).collect::<Vec<_>>()
                    );
                    // The assistant message with all call descriptors is
                    // appended before any dispatch, preserving emission order.
                    let assistant_msg = AgentMessage::assistant_tool_calls(
                        session_id.clone(),
                        "",
                        tool_calls.clone(),
                    );
                    self.store
                        .append(&assistant_msg)
                        .await
                        .map_err(proto::Error::Database)?;
                    messages.push(ChatMessage::assistant_tool_calls("", tool_calls.clone()));

                    for call in &tool_calls {
                        let result = self.dispatch_call(call, approval, &progress).await;

                        let tool_msg = AgentMessage::tool_result(
                            session_id.clone(),
                            &result.call_id,
                            &result.tool_name,
                            &result.output,
                        );
                        self.store
                            .append(&tool_msg)
                            .await
                            .map_err(proto::Error::Database)?;
                        messages.push(ChatMessage::tool_result(
                            &result.call_id,
                            &result.tool_name,
                            &result.output,
                        ));
                    }
                }
            }
        }

        // Circuit breaker against runaway tool-call loops; a normal reply,
        // persisted like any other assistant turn.
        warn!(
            "Iteration cap ({}) reached for session {session_id}",
            self.max_iterations
        );
        self.persist_assistant(session_id, ITERATION_CAP_REPLY)
            .await?;
        Ok(ITERATION_CAP_REPLY.to_string())
    }

    /// Routes one tool call through approval and invocation.
    ///
    /// Always produces a result: denials and faults become structured error
    /// payloads so the model receives a tool message for every call it made.
    async fn dispatch_call(
        &self,
        call: &ToolCall,
        approval: &Arc<dyn ApprovalHandler>,
        progress: &Option<mpsc::Sender<ProgressEvent>>,
    ) -> ToolResult {
        let decision = approval
            .request_approval(ApprovalRequest {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments: call.arguments.clone(),
            })
            .await;

        if !decision.approved {
            info!("Tool call {} denied by operator", call.id);
            emit(
                progress,
                ProgressEvent::ToolDenied {
                    call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                    reason: decision.reason.clone(),
                },
            )
            .await;
            return ToolResult::error(
                &call.id,
                &call.name,
                denial_output(decision.reason.as_deref()),
            );
        }

        emit(
            progress,
            ProgressEvent::ToolExecuting {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
            },
        )
        .await;

        match self.broker.invoke(&call.name, call.arguments.clone()).await {
            Ok(output) => {
                emit(
                    progress,
                    ProgressEvent::ToolSucceeded {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                    },
                )
                .await;
                ToolResult::success(&call.id, &call.name, output)
            }
            Err(e) => {
                warn!("Tool call {} ({}) failed: {e}", call.id, call.name);
                emit(
                    progress,
                    ProgressEvent::ToolFailed {
                        call_id: call.id.clone(),
                        tool_name: call.name.clone(),
                        error: e.to_string(),
                    },
                )
                .await;
                ToolResult::error(&call.id, &call.name, fault_output(&e.to_string()))
            }
        }
    }

    async fn persist_assistant(
        &self,
        session_id: &SessionId,
        text: &str,
    ) -> Result<(), proto::Error> {
        let msg = AgentMessage::new(session_id.clone(), Role::Assistant, text);
        self.store
            .append(&msg)
            .await
            .map_err(proto::Error::Database)?;
        self.store
            .touch_session(session_id)
            .await
            .map_err(proto::Error::Database)?;
        Ok(())
    }
}

/// Sends a progress event when a consumer is attached.
async fn emit(progress: &Option<mpsc::Sender<ProgressEvent>>, event: ProgressEvent) {
    if let Some(tx) = progress
        && tx.send(event).await.is_err()
    {
        debug!("Progress consumer dropped");
    }
}

/// Assembles the model transcript: preamble, stored window, transient input.
fn build_transcript(
    system_prompt: &str,
    history: &[AgentMessage],
    transient: Option<&AgentMessage>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(ChatMessage::system(system_prompt));
    for msg in history.iter().chain(transient) {
        messages.push(ChatMessage {
            role: msg.role,
            content: msg.content.clone(),
            tool_call_id: msg.tool_call_id.clone(),
            tool_name: msg.tool_name.clone(),
            tool_calls: msg.tool_calls.clone(),
        });
    }
    messages
}

/// Error payload fed back to the model when the operator denies a call.
fn denial_output(reason: Option<&str>) -> String {
    match reason {
        Some(reason) => {
            json!({"error": format!("Tool call denied by user because: {reason}")}).to_string()
        }
        None => json!({"error": "Tool call denied by user"}).to_string(),
    }
}

/// Error payload fed back to the model when an invocation faults.
fn fault_output(error: &str) -> String {
    json!({"error": error}).to_string()
}
