//! Tool-name qualification and the model-facing catalog projection.
//!
//! The model API only accepts `[A-Za-z0-9_-]` function names, so the catalog
//! publishes `provider_tool` with any reserved `:` inside the raw tool name
//! normalized to `_`. Resolution accepts the explicit `provider:tool` form
//! first and falls back to matching a live provider name as a `_`-separated
//! prefix, so splitting stays unambiguous even when provider names contain
//! underscores.

use proto::{ProviderError, ToolDefinition};
use tracing::debug;

use crate::session::ProviderTool;

/// Separator the model-facing catalog uses.
const SAFE_SEPARATOR: char = '_';
/// Separator reserved for the explicit qualified form.
const EXPLICIT_SEPARATOR: char = ':';

/// Builds the published qualified name for a provider's tool.
pub fn qualify(provider: &str, tool: &str) -> String {
    let safe_tool = tool.replace(EXPLICIT_SEPARATOR, &SAFE_SEPARATOR.to_string());
    format!("{provider}{SAFE_SEPARATOR}{safe_tool}")
}

/// Splits a qualified call name back into `(provider, tool)`.
///
/// Tries the explicit `provider:tool` form first, then the longest live
/// provider name followed by `_`. Returns `None` when no live provider
/// matches the provider segment.
pub fn split_qualified(name: &str, live_providers: &[String]) -> Option<(String, String)> {
    if let Some((provider, tool)) = name.split_once(EXPLICIT_SEPARATOR) {
        return live_providers
            .iter()
            .any(|p| p == provider)
            .then(|| (provider.to_string(), tool.to_string()));
    }

    live_providers
        .iter()
        .filter_map(|provider| {
            name.strip_prefix(provider.as_str())
                .and_then(|rest| rest.strip_prefix(SAFE_SEPARATOR))
                .map(|tool| (provider.clone(), tool.to_string()))
        })
        .max_by_key(|(provider, _)| provider.len())
}

/// Projects one provider's tools into the flat model-API format.
pub fn definitions(provider: &str, tools: &[ProviderTool]) -> Vec<ToolDefinition> {
    tools
        .iter()
        .map(|tool| {
            ToolDefinition::new(
                qualify(provider, &tool.name),
                format!("[{provider}] {}", tool.description),
                tool.input_schema.clone(),
            )
        })
        .collect()
}

/// Validates call arguments against the provider-declared JSON schema.
///
/// A schema the validator itself rejects is skipped rather than failing the
/// call; providers remain the final authority on their own inputs.
pub fn validate_arguments(
    schema: &serde_json::Value,
    arguments: &serde_json::Value,
) -> Result<(), ProviderError> {
    let validator = match jsonschema::validator_for(schema) {
        Ok(validator) => validator,
        Err(e) => {
            debug!("Skipping argument validation, provider schema invalid: {e}");
            return Ok(());
        }
    };

    validator
        .validate(arguments)
        .map_err(|e| ProviderError::InvalidArgs(e.to_string()))
}
