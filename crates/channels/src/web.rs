//! Web operator channel — axum HTTP server with WebSocket support.
//!
//! Serves the static chat page and history API alongside `/ws`, the
//! persistent operator connection used for chat and tool-call approval.
//! Every connection runs a receiver task (inbound frames) and a processor
//! task (queued chat turns); closing the connection abandons the
//! connection's pending approvals so no loop is left waiting.

use std::net::SocketAddr;
use std::sync::Arc;

use agent::TranscriptStore;
use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Query, State, WebSocketUpgrade, ws},
    response::IntoResponse,
    routing::{get, post},
};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use gateway::ApprovalGate;
use proto::{
    ApprovalDecision, ApprovalHandler, ApprovalRequest, ChannelError, OperatorId, ProgressEvent,
    Role, SessionId,
};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use crate::TurnFn;

/// Session key shared by operator connections that don't name one.
const DEFAULT_SESSION: &str = "web:default";
/// History rows returned by the REST endpoint.
const HISTORY_LIMIT: usize = 200;

// ─── Wire frames ───────────────────────────────────────────

/// Inbound WebSocket frames from the operator client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsInbound {
    /// A chat message to run through the orchestration loop.
    #[serde(rename = "chat")]
    Chat { message: String },
    /// Decision for a pending tool call.
    #[serde(rename = "tool_approval")]
    ToolApproval {
        tool_call_id: String,
        data: ApprovalPayload,
    },
}

/// Body of a `tool_approval` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalPayload {
    pub approved: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Outbound WebSocket frames to the operator client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WsOutbound {
    /// Final reply for a chat turn.
    #[serde(rename = "message")]
    Message { role: String, content: String },
    /// A tool call needs an approval decision.
    #[serde(rename = "tool_call_request")]
    ToolCallRequest {
        tool_call_id: String,
        tool_name: String,
        arguments: serde_json::Value,
    },
    /// The call was approved and dispatched.
    #[serde(rename = "tool_executing")]
    ToolExecuting {
        tool_call_id: String,
        tool_name: String,
    },
    /// The call completed successfully.
    #[serde(rename = "tool_success")]
    ToolSuccess {
        tool_call_id: String,
        tool_name: String,
    },
    /// The invocation faulted.
    #[serde(rename = "tool_error")]
    ToolError {
        tool_call_id: String,
        tool_name: String,
        error: String,
    },
    /// The operator denied the call.
    #[serde(rename = "tool_denied")]
    ToolDenied {
        tool_call_id: String,
        tool_name: String,
        reason: Option<String>,
    },
    /// Broadcast of a scheduled prompt's reply.
    #[serde(rename = "scheduled_message")]
    ScheduledMessage {
        system_prompt: String,
        response: String,
    },
    /// The turn itself failed (model transport fault).
    #[serde(rename = "error")]
    Error { message: String },
}

/// Converts a loop progress event into its wire frame.
fn progress_frame(event: ProgressEvent) -> WsOutbound {
    match event {
        ProgressEvent::ToolExecuting { call_id, tool_name } => WsOutbound::ToolExecuting {
            tool_call_id: call_id,
            tool_name,
        },
        ProgressEvent::ToolSucceeded { call_id, tool_name } => WsOutbound::ToolSuccess {
            tool_call_id: call_id,
            tool_name,
        },
        ProgressEvent::ToolFailed {
            call_id,
            tool_name,
            error,
        } => WsOutbound::ToolError {
            tool_call_id: call_id,
            tool_name,
            error,
        },
        ProgressEvent::ToolDenied {
            call_id,
            tool_name,
            reason,
        } => WsOutbound::ToolDenied {
            tool_call_id: call_id,
            tool_name,
            reason,
        },
    }
}

// ─── Query parameters ──────────────────────────────────────

/// Query parameters shared by `/ws` and the history endpoints.
#[derive(Debug, Deserialize)]
pub struct SessionParams {
    /// Conversation key; connections without one share a default session.
    pub session: Option<String>,
}

impl SessionParams {
    fn session_id(&self) -> SessionId {
        SessionId::from(self.session.clone().unwrap_or_else(|| DEFAULT_SESSION.to_string()))
    }
}

// ─── Shared state ──────────────────────────────────────────

struct WebState {
    store: Arc<TranscriptStore>,
    gate: Arc<ApprovalGate>,
    turn: TurnFn,
    /// Live operator connections, for scheduled broadcasts.
    clients: DashMap<OperatorId, mpsc::Sender<WsOutbound>>,
}

// ─── WebOperator ───────────────────────────────────────────

/// Web operator channel — axum server plus the live-connection set.
#[derive(Clone)]
pub struct WebOperator {
    port: u16,
    static_dir: String,
    state: Arc<WebState>,
}

impl WebOperator {
    /// Creates a web operator over the given collaborators.
    pub fn new(
        port: u16,
        static_dir: impl Into<String>,
        store: Arc<TranscriptStore>,
        gate: Arc<ApprovalGate>,
        turn: TurnFn,
    ) -> Self {
        Self {
            port,
            static_dir: static_dir.into(),
            state: Arc::new(WebState {
                store,
                gate,
                turn,
                clients: DashMap::new(),
            }),
        }
    }

    /// Binds the listener and serves until the process exits.
    pub async fn serve(&self) -> Result<(), ChannelError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| ChannelError::Bind(e.to_string()))?;
        info!("Web operator listening on {addr}");
        axum::serve(listener, self.router())
            .await
            .map_err(|e| ChannelError::Bind(e.to_string()))
    }

    /// Builds the axum application.
    fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .route("/ws", get(ws_handler))
            .route("/api/history", get(history_handler))
            .route("/api/clear-history", post(clear_history_handler))
            .fallback_service(ServeDir::new(&self.static_dir).append_index_html_on_directories(true))
            .layer(cors)
            .with_state(Arc::clone(&self.state))
    }

    /// Broadcasts a scheduled prompt's reply to every live connection.
    ///
    /// Connections attached after the prompt was drained receive nothing.
    pub async fn broadcast_scheduled(&self, prompt: &str, reply: &str) {
        let frame = WsOutbound::ScheduledMessage {
            system_prompt: prompt.to_string(),
            response: reply.to_string(),
        };
        let targets: Vec<(OperatorId, mpsc::Sender<WsOutbound>)> = self
            .state
            .clients
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (operator, tx) in targets {
            if tx.send(frame.clone()).await.is_err() {
                self.state.clients.remove(&operator);
            }
        }
    }

    /// Number of live operator connections.
    pub fn connection_count(&self) -> usize {
        self.state.clients.len()
    }
}

// ─── HTTP handlers ─────────────────────────────────────────

async fn history_handler(
    State(state): State<Arc<WebState>>,
    Query(params): Query<SessionParams>,
) -> impl IntoResponse {
    let session_id = params.session_id();
    match state.store.recent(&session_id, HISTORY_LIMIT).await {
        Ok(messages) => {
            let visible: Vec<serde_json::Value> = messages
                .iter()
                .filter(|m| matches!(m.role, Role::User | Role::Assistant))
                .filter(|m| !m.content.is_empty())
                .map(|m| serde_json::json!({"role": m.role.to_string(), "content": m.content}))
                .collect();
            Json(serde_json::json!({"messages": visible}))
        }
        Err(e) => {
            warn!("History read failed: {e}");
            Json(serde_json::json!({"messages": []}))
        }
    }
}

async fn clear_history_handler(
    State(state): State<Arc<WebState>>,
    Query(params): Query<SessionParams>,
) -> impl IntoResponse {
    let session_id = params.session_id();
    match state.store.clear_session(&session_id).await {
        Ok(()) => Json(serde_json::json!({"status": "success", "message": "History cleared"})),
        Err(e) => {
            warn!("History clear failed: {e}");
            Json(serde_json::json!({"status": "error", "message": e.to_string()}))
        }
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<WebState>>,
    Query(params): Query<SessionParams>,
) -> impl IntoResponse {
    let session_id = params.session_id();
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
}

// ─── Connection handling ───────────────────────────────────

async fn handle_socket(socket: ws::WebSocket, state: Arc<WebState>, session_id: SessionId) {
    let operator = OperatorId::new();
    info!("Operator {operator} connected (session {session_id})");

    let (out_tx, mut out_rx) = mpsc::channel::<WsOutbound>(64);
    state.clients.insert(operator.clone(), out_tx.clone());
    let (closed_tx, closed_rx) = watch::channel(false);

    let (mut sink, mut stream) = socket.split();

    // Writer task: serialize outbound frames onto the socket.
    let writer = tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    warn!("Failed to serialize outbound frame: {e}");
                    continue;
                }
            };
            if sink.send(ws::Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Processor task: drain queued chat turns one at a time.
    let (chat_tx, mut chat_rx) = mpsc::channel::<String>(16);
    let processor = {
        let state = Arc::clone(&state);
        let operator = operator.clone();
        let session_id = session_id.clone();
        let out_tx = out_tx.clone();
        tokio::spawn(async move {
            while let Some(text) = chat_rx.recv().await {
                let (progress_tx, mut progress_rx) = mpsc::channel::<ProgressEvent>(32);
                let forwarder = {
                    let out_tx = out_tx.clone();
                    tokio::spawn(async move {
                        while let Some(event) = progress_rx.recv().await {
                            let _ = out_tx.send(progress_frame(event)).await;
                        }
                    })
                };

                let approval: Arc<dyn ApprovalHandler> = Arc::new(GateApprovalHandler {
                    gate: Arc::clone(&state.gate),
                    operator: operator.clone(),
                    out_tx: out_tx.clone(),
                    closed: closed_rx.clone(),
                });

                let outcome = (state.turn)(session_id.clone(), text, approval, progress_tx).await;
                let _ = forwarder.await;

                let frame = match outcome {
                    Ok(reply) => WsOutbound::Message {
                        role: "assistant".to_string(),
                        content: reply,
                    },
                    Err(e) => {
                        warn!("Turn failed for session {session_id}: {e}");
                        WsOutbound::Error {
                            message: e.to_string(),
                        }
                    }
                };
                if out_tx.send(frame).await.is_err() {
                    break;
                }
            }
        })
    };

    // Receiver loop: route inbound frames.
    while let Some(message) = stream.next().await {
        let text = match message {
            Ok(ws::Message::Text(text)) => text,
            Ok(ws::Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        match serde_json::from_str::<WsInbound>(text.as_str()) {
            Ok(WsInbound::Chat { message }) => {
                if message.is_empty() {
                    continue;
                }
                if chat_tx.send(message).await.is_err() {
                    break;
                }
            }
            Ok(WsInbound::ToolApproval { tool_call_id, data }) => {
                let decision = if data.approved {
                    ApprovalDecision::approve()
                } else {
                    ApprovalDecision::deny(data.reason)
                };
                if let Err(e) = state.gate.resolve(&tool_call_id, decision) {
                    // Stale or duplicate decision; report, never crash.
                    warn!("Approval frame dropped: {e}");
                }
            }
            Err(e) => debug!("Ignoring malformed inbound frame: {e}"),
        }
    }

    // Disconnect: free the connection's waits so no loop hangs on it. The
    // closed signal makes any approval requested after the abandon deny
    // itself instead of waiting on a connection that no longer exists.
    info!("Operator {operator} disconnected");
    state.clients.remove(&operator);
    let _ = closed_tx.send(true);
    state.gate.abandon(&operator);
    drop(chat_tx);
    let _ = processor.await;
    writer.abort();
}

// ─── Approval over the socket ──────────────────────────────

/// Approval handler that round-trips each request over the WebSocket.
struct GateApprovalHandler {
    gate: Arc<ApprovalGate>,
    operator: OperatorId,
    out_tx: mpsc::Sender<WsOutbound>,
    /// Flips to true when the owning connection closes.
    closed: watch::Receiver<bool>,
}

impl GateApprovalHandler {
    fn lost() -> ApprovalDecision {
        ApprovalDecision::deny(Some("connection lost".to_string()))
    }
}

#[async_trait]
impl ApprovalHandler for GateApprovalHandler {
    async fn request_approval(&self, req: ApprovalRequest) -> ApprovalDecision {
        if *self.closed.borrow() {
            return Self::lost();
        }

        // Register before surfacing so a prompt reply can always resolve.
        let pending = self.gate.request(&self.operator, &req);

        let frame = WsOutbound::ToolCallRequest {
            tool_call_id: req.call_id.clone(),
            tool_name: req.tool_name.clone(),
            arguments: req.arguments.clone(),
        };
        if self.out_tx.send(frame).await.is_err() {
            // Connection already gone; consume the wait ourselves.
            let _ = self.gate.resolve(&req.call_id, Self::lost());
        }

        let mut closed = self.closed.clone();
        tokio::select! {
            decision = pending.decision() => decision,
            _ = wait_true(&mut closed) => {
                let _ = self.gate.resolve(&req.call_id, Self::lost());
                Self::lost()
            }
        }
    }
}

/// Resolves once the watch reads true (or its sender is gone).
async fn wait_true(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}
