//! Multi-provider session registry.
//!
//! Providers connect as independent concurrent tasks; one provider's failure
//! neither delays nor aborts its siblings. A provider is registered in a
//! single insert only after its handshake and tool listing complete, and an
//! exit monitor removes the whole entry (session and tools together) the
//! moment its process dies, so catalog readers never observe a
//! half-registered provider.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::future::join_all;
use proto::{ProviderError, ToolBroker, ToolDefinition};
use tracing::{info, warn};

use crate::catalog;
use crate::session::{ProviderLaunch, ProviderSession, ProviderTool};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

struct ProviderEntry {
    session: Arc<ProviderSession>,
    tools: Vec<ProviderTool>,
}

/// Registry mapping provider names to live sessions and their tools.
pub struct ProviderRegistry {
    providers: DashMap<String, Arc<ProviderEntry>>,
}

impl ProviderRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            providers: DashMap::new(),
        }
    }

    /// Connects every configured provider concurrently.
    ///
    /// Failures are logged and skipped; the registry ends up holding exactly
    /// the providers whose handshakes succeeded.
    pub async fn connect_all(self: &Arc<Self>, configs: Vec<(String, ProviderLaunch)>) {
        let attempts = configs.into_iter().map(|(name, launch)| {
            let registry = Arc::clone(self);
            async move {
                if let Err(e) = registry.connect(&name, &launch).await {
                    warn!("Failed to connect provider '{name}': {e}");
                }
            }
        });
        join_all(attempts).await;
    }

    /// Spawns, handshakes, and registers one provider.
    pub async fn connect(
        self: &Arc<Self>,
        name: &str,
        launch: &ProviderLaunch,
    ) -> Result<(), ProviderError> {
        let session = ProviderSession::spawn(name, launch)?;

        let handshake = async {
            session.initialize().await?;
            session.list_tools().await
        };
        let tools = match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake).await {
            Ok(Ok(tools)) => tools,
            Ok(Err(e)) => {
                session.mark_failed();
                return Err(e);
            }
            Err(_) => {
                session.mark_failed();
                return Err(ProviderError::Handshake(format!(
                    "timed out after {}s",
                    HANDSHAKE_TIMEOUT.as_secs()
                )));
            }
        };

        session.mark_ready();
        info!("Provider '{name}' ready: {} tools", tools.len());
        for tool in &tools {
            info!("  - {}: {}", tool.name, tool.description);
        }

        self.providers.insert(
            name.to_string(),
            Arc::new(ProviderEntry {
                session: Arc::clone(&session),
                tools,
            }),
        );

        let registry = Arc::clone(self);
        let monitor_name = name.to_string();
        tokio::spawn(async move {
            session.wait_closed().await;
            if registry.providers.remove(&monitor_name).is_some() {
                warn!("Provider '{monitor_name}' exited, removed from registry");
            }
        });

        Ok(())
    }

    /// Removes a provider and its tools, tearing its process down.
    pub fn remove(&self, name: &str) -> bool {
        match self.providers.remove(name) {
            Some((_, entry)) => {
                entry.session.mark_failed();
                true
            }
            None => false,
        }
    }

    /// Names of all live providers.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Whether any provider is live.
    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// Resolves a qualified call name to a live session plus tool descriptor.
    fn resolve(
        &self,
        qualified_name: &str,
    ) -> Result<(Arc<ProviderSession>, ProviderTool), ProviderError> {
        let live: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        let (provider, tool_name) = catalog::split_qualified(qualified_name, &live)
            .ok_or_else(|| ProviderError::NotFound(qualified_name.to_string()))?;

        let entry = self
            .providers
            .get(&provider)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| ProviderError::NotFound(qualified_name.to_string()))?;

        let tool = entry
            .tools
            .iter()
            .find(|t| t.name == tool_name)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(qualified_name.to_string()))?;

        Ok((Arc::clone(&entry.session), tool))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolBroker for ProviderRegistry {
    fn catalog(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .providers
            .iter()
            .flat_map(|e| catalog::definitions(e.key(), &e.value().tools))
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    async fn invoke(
        &self,
        qualified_name: &str,
        arguments: serde_json::Value,
    ) -> Result<String, ProviderError> {
        let (session, tool) = self.resolve(qualified_name)?;
        catalog::validate_arguments(&tool.input_schema, &arguments)?;
        session.call_tool(&tool.name, arguments).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::collections::HashMap;

    use super::*;

    /// A shell responder that answers the handshake, lists one `echo` tool,
    /// and replies `pong` to every invocation.
    const RESPONDER: &str = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*) printf '{"jsonrpc":"2.0","id":1,"result":{}}\n';;
    *'"tools/list"'*) printf '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo tool","inputSchema":{"type":"object","properties":{"value":{"type":"string"}},"required":["value"]}}]}}\n';;
    *'"tools/call"'*) printf '{"jsonrpc":"2.0","id":%d,"result":{"content":[{"type":"text","text":"pong"}]}}\n' "$(printf '%s' "$line" | sed 's/.*"id"://;s/,.*//')";;
  esac
done
"#;

    fn scripted(script: &str) -> ProviderLaunch {
        ProviderLaunch {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            env: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn connect_registers_tools_and_invokes() {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .connect("mock", &scripted(RESPONDER))
            .await
            .expect("provider should connect");

        let defs = registry.catalog();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "mock_echo");
        assert_eq!(defs[0].description, "[mock] Echo tool");

        let output = registry
            .invoke("mock_echo", serde_json::json!({"value":"hi"}))
            .await
            .expect("invoke should succeed");
        assert_eq!(output, "pong");
    }

    #[tokio::test]
    async fn invoke_rejects_arguments_failing_schema() {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .connect("mock", &scripted(RESPONDER))
            .await
            .expect("provider should connect");

        let err = registry
            .invoke("mock_echo", serde_json::json!({}))
            .await
            .expect_err("missing required arg should fail");
        assert!(matches!(err, ProviderError::InvalidArgs(_)));
    }

    #[tokio::test]
    async fn failed_handshake_leaves_registry_untouched() {
        let registry = Arc::new(ProviderRegistry::new());
        let err = registry
            .connect("broken", &scripted("exit 1"))
            .await
            .expect_err("dead provider should not connect");
        assert!(matches!(
            err,
            ProviderError::Closed | ProviderError::Handshake(_) | ProviderError::Io(_)
        ));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn connect_all_skips_failing_sibling() {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .connect_all(vec![
                ("good".to_string(), scripted(RESPONDER)),
                ("bad".to_string(), scripted("exit 1")),
            ])
            .await;

        assert_eq!(registry.provider_names(), vec!["good"]);
        let err = registry
            .invoke("bad_echo", serde_json::json!({"value":"x"}))
            .await
            .expect_err("tool on failed provider should not resolve");
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn invoke_unknown_tool_on_live_provider_is_not_found() {
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .connect("mock", &scripted(RESPONDER))
            .await
            .expect("provider should connect");

        let err = registry
            .invoke("mock_missing", serde_json::json!({}))
            .await
            .expect_err("unknown tool should not resolve");
        assert!(matches!(err, ProviderError::NotFound(_)));
    }

    #[tokio::test]
    async fn provider_exit_removes_entry_with_tools() {
        let exit_after_handshake = r#"
while IFS= read -r line; do
  case "$line" in
    *'"initialize"'*) printf '{"jsonrpc":"2.0","id":1,"result":{}}\n';;
    *'"tools/list"'*) printf '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"","inputSchema":{"type":"object"}}]}}\n'; exit 0;;
  esac
done
"#;
        let registry = Arc::new(ProviderRegistry::new());
        registry
            .connect("transient", &scripted(exit_after_handshake))
            .await
            .expect("provider should connect");

        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(registry.is_empty());
        assert!(registry.catalog().is_empty());
    }
}
