//! Tool call, catalog, and invocation types shared across the workspace.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProviderError;

/// A single tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Model-assigned call identifier, unique within the conversation.
    pub id: String,
    /// Qualified tool name (`provider_tool`).
    pub name: String,
    /// Parsed JSON arguments.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    /// Creates a tool call with a generated id (used by tests and fixtures).
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            arguments,
        }
    }
}

/// Flat tool descriptor in the shape the model API expects.
///
/// Derived from the provider registry; rebuilt whenever the set of live
/// providers changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Qualified, collision-free tool name.
    pub name: String,
    /// Human-readable description, prefixed with the provider name.
    pub description: String,
    /// JSON schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    /// Creates a tool definition from name/description/schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Result of one tool invocation, always tagged with its originating call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Originating call id.
    pub call_id: String,
    /// Qualified tool name.
    pub tool_name: String,
    /// Output content (error payloads are JSON `{"error": …}` strings).
    pub output: String,
    /// Whether the output represents a failure.
    pub is_error: bool,
}

impl ToolResult {
    /// Creates a successful result.
    pub fn success(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output: output.into(),
            is_error: false,
        }
    }

    /// Creates an error result.
    pub fn error(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            output: output.into(),
            is_error: true,
        }
    }
}

/// Routing seam between the orchestration loop and the provider registry.
///
/// The loop only ever sees this trait; the concrete registry lives in the
/// `providers` crate, and tests substitute scripted implementations.
#[async_trait]
pub trait ToolBroker: Send + Sync {
    /// Current flat catalog of every live provider's tools.
    fn catalog(&self) -> Vec<ToolDefinition>;

    /// Resolves a qualified name and invokes the tool on its provider.
    async fn invoke(
        &self,
        qualified_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_new_generates_unique_ids() {
        let a = ToolCall::new("anime_search", serde_json::json!({}));
        let b = ToolCall::new("anime_search", serde_json::json!({}));
        assert_ne!(a.id, b.id);
        assert_eq!(a.name, "anime_search");
    }

    #[test]
    fn tool_result_constructors_set_error_flag() {
        let ok = ToolResult::success("c1", "anime_search", "found 3");
        assert!(!ok.is_error);
        assert_eq!(ok.call_id, "c1");

        let err = ToolResult::error("c2", "anime_search", r#"{"error":"boom"}"#);
        assert!(err.is_error);
        assert_eq!(err.tool_name, "anime_search");
    }

    #[test]
    fn tool_definition_serializes_parameters_verbatim() {
        let def = ToolDefinition::new(
            "timer_scheduleMessage",
            "[timer] Schedules a message",
            serde_json::json!({"type":"object","required":["delaySeconds"]}),
        );
        let json = serde_json::to_value(&def).expect("serialize");
        assert_eq!(json["name"], "timer_scheduleMessage");
        assert_eq!(json["parameters"]["required"][0], "delaySeconds");
    }
}
