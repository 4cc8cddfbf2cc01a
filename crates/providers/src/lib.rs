//! Tool provider sessions, the multi-provider registry, and the flat
//! model-facing tool catalog.
//!
//! Each provider is an external process speaking line-delimited JSON-RPC
//! over stdio: an `initialize` handshake, a one-shot `tools/list`, then
//! `tools/call` for the lifetime of the connection.

pub mod catalog;
pub mod registry;
pub mod session;

/// Qualified-name helpers and catalog projection.
pub use catalog::{qualify, split_qualified, validate_arguments};
/// Multi-provider session registry.
pub use registry::ProviderRegistry;
/// Single provider connection and its launch specification.
pub use session::{ConnectionState, ProviderLaunch, ProviderSession, ProviderTool};
