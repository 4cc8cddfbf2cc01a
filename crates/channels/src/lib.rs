//! Operator channels: the WebSocket/HTTP surface and the console REPL.
//!
//! Both channels drive the same turn handler and the same approval
//! contract; the console is the degenerate single-operator case.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use proto::{ApprovalHandler, ProgressEvent, SessionId};
use tokio::sync::mpsc;

pub mod console;
pub mod web;

/// Console REPL operator.
pub use console::ConsoleOperator;
/// WebSocket/HTTP operator server.
pub use web::WebOperator;

/// Boxed async turn handler wired by the binary.
///
/// Runs one conversation turn (input text → final reply) with the given
/// approval handler and progress sink; the wiring is expected to serialize
/// turns per session before reaching the orchestration loop.
pub type TurnFn = Arc<
    dyn Fn(
            SessionId,
            String,
            Arc<dyn ApprovalHandler>,
            mpsc::Sender<ProgressEvent>,
        ) -> Pin<Box<dyn Future<Output = Result<String, proto::Error>> + Send>>
        + Send
        + Sync,
>;
