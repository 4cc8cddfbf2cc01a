//! Single long-lived connection to a tool-providing process.
//!
//! The provider is spawned from its launch specification and spoken to over
//! stdio with line-delimited JSON-RPC. A reader task routes responses to
//! their waiting requests by id; when the process exits, every in-flight
//! request is failed and the session is marked closed.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use proto::ProviderError;
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Launch specification for one provider process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderLaunch {
    /// Executable to spawn.
    pub command: String,
    /// Command-line arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: HashMap<String, String>,
}

/// Liveness of a provider connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Spawned, handshake not yet complete.
    Connecting,
    /// Handshake done, tools listed, accepting invocations.
    Ready,
    /// Handshake failed; the session was never registered.
    Failed,
    /// Process exited or the stdio pipe broke.
    Closed,
}

/// One tool advertised by a provider at connect time.
#[derive(Debug, Clone)]
pub struct ProviderTool {
    /// Raw tool name as the provider declares it.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub input_schema: Value,
}

type PendingMap = Mutex<HashMap<u64, oneshot::Sender<Result<Value, ProviderError>>>>;

/// Owns one provider process and its request/response plumbing.
pub struct ProviderSession {
    name: String,
    stdin: tokio::sync::Mutex<ChildStdin>,
    pending: Arc<PendingMap>,
    next_id: AtomicU64,
    state: Arc<watch::Sender<ConnectionState>>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ProviderSession {
    /// Spawns the provider process and starts its response reader.
    ///
    /// The returned session is still [`ConnectionState::Connecting`]; callers
    /// run [`initialize`](Self::initialize) and [`list_tools`](Self::list_tools)
    /// before exposing it.
    pub fn spawn(name: &str, launch: &ProviderLaunch) -> Result<Arc<Self>, ProviderError> {
        let mut command = Command::new(&launch.command);
        command
            .args(&launch.args)
            .envs(&launch.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command
            .spawn()
            .map_err(|e| ProviderError::Spawn(format!("{}: {e}", launch.command)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProviderError::Spawn("stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::Spawn("stdout unavailable".to_string()))?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let session = Arc::new(Self {
            name: name.to_string(),
            stdin: tokio::sync::Mutex::new(stdin),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            state: Arc::new(state_tx),
            state_rx,
        });

        let failure_rx = session.state.subscribe();
        tokio::spawn(read_loop(
            session.name.clone(),
            stdout,
            child,
            Arc::clone(&session.pending),
            Arc::clone(&session.state),
            failure_rx,
        ));

        Ok(session)
    }

    /// Provider name this session was registered under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current liveness state.
    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Marks the handshake complete.
    pub fn mark_ready(&self) {
        let _ = self.state.send(ConnectionState::Ready);
    }

    /// Marks the handshake failed.
    pub fn mark_failed(&self) {
        let _ = self.state.send(ConnectionState::Failed);
    }

    /// Resolves once the connection reaches a terminal state.
    pub async fn wait_closed(&self) {
        let mut rx = self.state_rx.clone();
        loop {
            let state = *rx.borrow_and_update();
            if matches!(state, ConnectionState::Closed | ConnectionState::Failed) {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Runs the capability handshake.
    pub async fn initialize(&self) -> Result<(), ProviderError> {
        let params = json!({
            "protocolVersion": "2024-11-05",
            "clientInfo": {"name": "tollgate", "version": env!("CARGO_PKG_VERSION")},
        });
        self.request("initialize", params).await.map(|_| ())
    }

    /// Lists the tools this provider advertises.
    pub async fn list_tools(&self) -> Result<Vec<ProviderTool>, ProviderError> {
        let result = self.request("tools/list", json!({})).await?;
        parse_tool_list(&result)
    }

    /// Invokes one tool and flattens its content to text.
    ///
    /// There is no cancellation once dispatched; the call runs to completion
    /// or fault.
    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<String, ProviderError> {
        let result = self
            .request("tools/call", json!({"name": tool, "arguments": arguments}))
            .await?;
        let text = flatten_content(&result);
        if result
            .get("isError")
            .and_then(Value::as_bool)
            .unwrap_or(false)
        {
            return Err(ProviderError::Invocation {
                provider: self.name.clone(),
                reason: text,
            });
        }
        Ok(text)
    }

    /// Sends one request line and suspends until its response is routed back.
    async fn request(&self, method: &str, params: Value) -> Result<Value, ProviderError> {
        if matches!(
            self.state(),
            ConnectionState::Closed | ConnectionState::Failed
        ) {
            return Err(ProviderError::Closed);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().expect("pending lock").insert(id, tx);

        let line = encode_request(id, method, &params);
        {
            let mut stdin = self.stdin.lock().await;
            if let Err(e) = stdin.write_all(line.as_bytes()).await {
                self.pending.lock().expect("pending lock").remove(&id);
                return Err(ProviderError::Io(e));
            }
        }

        debug!("Provider '{}' request {id}: {method}", self.name);
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Closed),
        }
    }
}

/// Reads response lines until the provider exits, then fails all waiters.
///
/// Also watches the state channel so a handshake marked failed tears the
/// child process down instead of leaving it running unregistered.
async fn read_loop(
    name: String,
    stdout: ChildStdout,
    mut child: Child,
    pending: Arc<PendingMap>,
    state: Arc<watch::Sender<ConnectionState>>,
    mut failure: watch::Receiver<ConnectionState>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    dispatch_frame(&name, &line, &pending);
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Provider '{name}' read error: {e}");
                    break;
                }
            },
            changed = failure.changed() => {
                if changed.is_err() || *failure.borrow() == ConnectionState::Failed {
                    let _ = child.kill().await;
                    break;
                }
            }
        }
    }

    let waiters: Vec<_> = pending
        .lock()
        .expect("pending lock")
        .drain()
        .map(|(_, tx)| tx)
        .collect();
    for tx in waiters {
        let _ = tx.send(Err(ProviderError::Closed));
    }

    if *state.borrow() != ConnectionState::Failed {
        let _ = state.send(ConnectionState::Closed);
    }
    let _ = child.wait().await;
    info!("Provider '{name}' connection closed");
}

/// Routes one response frame to the request waiting on its id.
fn dispatch_frame(name: &str, line: &str, pending: &PendingMap) {
    match parse_response(line) {
        Ok(Some((id, outcome))) => {
            let waiter = pending.lock().expect("pending lock").remove(&id);
            match waiter {
                Some(tx) => {
                    let routed = outcome.map_err(|reason| ProviderError::Invocation {
                        provider: name.to_string(),
                        reason,
                    });
                    let _ = tx.send(routed);
                }
                None => debug!("Provider '{name}' response for unknown id {id}"),
            }
        }
        Ok(None) => debug!("Provider '{name}' notification ignored"),
        Err(e) => warn!("Provider '{name}' sent malformed frame: {e}"),
    }
}

/// Encodes one JSON-RPC request as a newline-terminated frame.
fn encode_request(id: u64, method: &str, params: &Value) -> String {
    let frame = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    });
    format!("{frame}\n")
}

/// Parses a response frame into `(id, result-or-error-message)`.
///
/// Returns `Ok(None)` for id-less notification frames.
fn parse_response(line: &str) -> Result<Option<(u64, Result<Value, String>)>, ProviderError> {
    let frame: Value =
        serde_json::from_str(line).map_err(|e| ProviderError::Protocol(e.to_string()))?;

    let Some(id) = frame.get("id").and_then(Value::as_u64) else {
        return Ok(None);
    };

    if let Some(error) = frame.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown provider error")
            .to_string();
        return Ok(Some((id, Err(message))));
    }

    let result = frame.get("result").cloned().unwrap_or(Value::Null);
    Ok(Some((id, Ok(result))))
}

/// Flattens a `tools/call` result's content blocks into plain text.
fn flatten_content(result: &Value) -> String {
    match result.get("content") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => item.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
        None => result.to_string(),
    }
}

/// Parses the `tools/list` result into tool descriptors.
fn parse_tool_list(result: &Value) -> Result<Vec<ProviderTool>, ProviderError> {
    let tools = result
        .get("tools")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Protocol("tools/list result missing tools".to_string()))?;

    tools
        .iter()
        .map(|entry| {
            let name = entry
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| ProviderError::Protocol("tool entry missing name".to_string()))?;
            Ok(ProviderTool {
                name: name.to_string(),
                description: entry
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input_schema: entry
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object"})),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_request_produces_newline_terminated_frame() {
        let line = encode_request(7, "tools/call", &json!({"name": "search"}));
        assert!(line.ends_with('\n'));
        let frame: Value = serde_json::from_str(line.trim()).expect("frame parses");
        assert_eq!(frame["jsonrpc"], "2.0");
        assert_eq!(frame["id"], 7);
        assert_eq!(frame["method"], "tools/call");
        assert_eq!(frame["params"]["name"], "search");
    }

    #[test]
    fn parse_response_routes_result_by_id() {
        let parsed = parse_response(r#"{"jsonrpc":"2.0","id":3,"result":{"ok":true}}"#)
            .expect("frame parses");
        let (id, outcome) = parsed.expect("response has id");
        assert_eq!(id, 3);
        assert_eq!(outcome.expect("result")["ok"], true);
    }

    #[test]
    fn parse_response_surfaces_error_message() {
        let parsed =
            parse_response(r#"{"jsonrpc":"2.0","id":4,"error":{"code":-32000,"message":"boom"}}"#)
                .expect("frame parses");
        let (id, outcome) = parsed.expect("response has id");
        assert_eq!(id, 4);
        assert_eq!(outcome.expect_err("error"), "boom");
    }

    #[test]
    fn parse_response_treats_idless_frame_as_notification() {
        let parsed = parse_response(r#"{"jsonrpc":"2.0","method":"log","params":{}}"#)
            .expect("frame parses");
        assert!(parsed.is_none());
    }

    #[test]
    fn parse_response_rejects_malformed_json() {
        let err = parse_response("{not json").expect_err("malformed frame should fail");
        assert!(matches!(err, ProviderError::Protocol(_)));
    }

    #[test]
    fn flatten_content_joins_text_blocks() {
        let result = json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "text", "text": "line two"},
            ]
        });
        assert_eq!(flatten_content(&result), "line one\nline two");
    }

    #[test]
    fn flatten_content_falls_back_to_raw_value() {
        assert_eq!(flatten_content(&json!({"content": "plain"})), "plain");
        assert_eq!(flatten_content(&json!({"content": 42})), "42");
        assert_eq!(flatten_content(&json!({"other": 1})), r#"{"other":1}"#);
    }

    #[test]
    fn parse_tool_list_reads_tools_with_defaults() {
        let result = json!({
            "tools": [
                {"name": "search", "description": "Search shows", "inputSchema": {"type": "object"}},
                {"name": "bare"},
            ]
        });
        let tools = parse_tool_list(&result).expect("tool list parses");
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "search");
        assert_eq!(tools[0].description, "Search shows");
        assert_eq!(tools[1].description, "");
        assert_eq!(tools[1].input_schema["type"], "object");
    }

    #[test]
    fn parse_tool_list_rejects_missing_tools_field() {
        let err = parse_tool_list(&json!({})).expect_err("missing tools should fail");
        assert!(matches!(err, ProviderError::Protocol(_)));

        let err = parse_tool_list(&json!({"tools": [{"description": "no name"}]}))
            .expect_err("missing name should fail");
        assert!(matches!(err, ProviderError::Protocol(_)));
    }
}
