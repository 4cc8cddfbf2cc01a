//! Console operator — a single-operator REPL over stdin/stdout.
//!
//! The degenerate implementation of the approval contract: the "persistent
//! connection" is the terminal, and every tool call is gated on a blocking
//! yes/no prompt with an optional denial reason.

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use proto::{
    ApprovalDecision, ApprovalHandler, ApprovalRequest, ChannelError, ProgressEvent, SessionId,
};
use tokio::sync::mpsc;
use tracing::warn;

use crate::TurnFn;

/// Console REPL driving the same turn handler as the web channel.
pub struct ConsoleOperator {
    turn: TurnFn,
    session_id: SessionId,
}

impl ConsoleOperator {
    /// Creates a console operator bound to one conversation.
    pub fn new(turn: TurnFn, session_id: SessionId) -> Self {
        Self { turn, session_id }
    }

    /// Runs the REPL until `quit` or end of input.
    pub async fn run(&self) -> Result<(), ChannelError> {
        println!("{}", "=".repeat(60));
        println!("Chatbot ready. Type 'quit' to exit.");
        println!("{}\n", "=".repeat(60));

        loop {
            prompt("You: ")?;
            let Some(line) = read_line().await? else {
                break;
            };
            let input = line.trim().to_string();
            if matches!(input.to_lowercase().as_str(), "quit" | "exit" | "q") {
                println!("Goodbye!");
                break;
            }
            if input.is_empty() {
                continue;
            }

            let (progress_tx, progress_rx) = mpsc::channel(32);
            let printer = tokio::spawn(print_progress(progress_rx));
            let approval: Arc<dyn ApprovalHandler> = Arc::new(ConsoleApproval);

            match (self.turn)(self.session_id.clone(), input, approval, progress_tx).await {
                Ok(reply) => println!("\nAssistant: {reply}\n"),
                Err(e) => {
                    warn!("Turn failed: {e}");
                    eprintln!("\nTurn failed: {e}\n");
                }
            }
            let _ = printer.await;
        }
        Ok(())
    }
}

/// Prints live tool-call status between the prompt and the reply.
async fn print_progress(mut rx: mpsc::Receiver<ProgressEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::ToolExecuting { tool_name, .. } => {
                println!("Executing {tool_name}...");
            }
            ProgressEvent::ToolSucceeded { .. } => {
                println!("Tool executed successfully");
            }
            ProgressEvent::ToolFailed { error, .. } => {
                println!("Tool execution failed: {error}");
            }
            ProgressEvent::ToolDenied { .. } => {
                println!("Tool call denied");
            }
        }
    }
}

/// Blocking yes/no approval prompt, one call at a time.
struct ConsoleApproval;

#[async_trait]
impl ApprovalHandler for ConsoleApproval {
    async fn request_approval(&self, req: ApprovalRequest) -> ApprovalDecision {
        let args =
            serde_json::to_string_pretty(&req.arguments).unwrap_or_else(|_| "{}".to_string());
        println!("\n{}", "=".repeat(60));
        println!("Tool Call Request: {}", req.tool_name);
        println!("{}", "=".repeat(60));
        println!("Arguments: {args}");
        println!("{}", "=".repeat(60));

        loop {
            if prompt("\nApprove this tool call? (yes/no): ").is_err() {
                return ApprovalDecision::deny(Some("connection lost".to_string()));
            }
            let Ok(Some(line)) = read_line().await else {
                return ApprovalDecision::deny(Some("connection lost".to_string()));
            };
            match parse_affirmative(&line) {
                Some(true) => return ApprovalDecision::approve(),
                Some(false) => {
                    let _ = prompt("Give a reason why the call was denied? (yes/no): ");
                    if let Ok(Some(answer)) = read_line().await
                        && parse_affirmative(&answer) == Some(true)
                    {
                        let _ = prompt("Reason: ");
                        if let Ok(Some(reason)) = read_line().await {
                            return ApprovalDecision::deny(Some(reason.trim().to_string()));
                        }
                    }
                    return ApprovalDecision::deny(None);
                }
                None => println!("Please enter 'yes' or 'no'"),
            }
        }
    }
}

/// Interprets a yes/no answer; `None` means unrecognized.
fn parse_affirmative(input: &str) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "yes" | "y" => Some(true),
        "no" | "n" => Some(false),
        _ => None,
    }
}

/// Writes an inline prompt without a trailing newline.
fn prompt(text: &str) -> Result<(), ChannelError> {
    let mut stdout = std::io::stdout();
    stdout.write_all(text.as_bytes()).map_err(ChannelError::Io)?;
    stdout.flush().map_err(ChannelError::Io)
}

/// Reads one line off stdin without blocking the runtime.
///
/// Returns `None` at end of input.
async fn read_line() -> Result<Option<String>, ChannelError> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line)),
            Err(e) => Err(ChannelError::Io(e)),
        }
    })
    .await
    .map_err(|e| ChannelError::SendFailed(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_affirmative_accepts_yes_and_no_spellings() {
        assert_eq!(parse_affirmative("yes"), Some(true));
        assert_eq!(parse_affirmative(" Y \n"), Some(true));
        assert_eq!(parse_affirmative("no"), Some(false));
        assert_eq!(parse_affirmative("N"), Some(false));
        assert_eq!(parse_affirmative("maybe"), None);
        assert_eq!(parse_affirmative(""), None);
    }
}
