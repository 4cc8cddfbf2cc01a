//! TOML configuration with a degrade-to-defaults policy.
//!
//! A missing or malformed file logs a warning and yields the default
//! configuration — and with it an empty provider set — rather than a
//! startup failure.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use providers::ProviderLaunch;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    /// Tool providers keyed by name.
    pub providers: BTreeMap<String, ProviderConfig>,
    pub web: WebConfig,
    pub scheduler: SchedulerConfig,
}

/// Model and loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Model id sent to the completion endpoint.
    pub model: String,
    /// OpenAI-compatible base URL; unset means the default endpoint.
    pub base_url: Option<String>,
    /// API key; local endpoints typically accept any value.
    pub api_key: String,
    /// Optional system preamble override.
    pub system_prompt: Option<String>,
    /// Model-call cap per turn.
    pub max_iterations: usize,
    /// Stored messages included in each model call.
    pub history_window: usize,
    /// SQLite transcript database path.
    pub db_path: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            base_url: Some("http://localhost:5001/v1".to_string()),
            api_key: "none".to_string(),
            system_prompt: None,
            max_iterations: 10,
            history_window: 40,
            db_path: "chat_memory.db".to_string(),
        }
    }
}

/// Launch specification for one tool provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Web operator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub port: u16,
    /// Directory of static chat assets.
    pub static_dir: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: 8000,
            static_dir: "static".to_string(),
        }
    }
}

/// Scheduled-prompt queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Durable queue record path.
    pub queue_path: String,
    /// Poll interval for records written by external processes.
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_path: "pending_prompts.json".to_string(),
            poll_interval_ms: 500,
        }
    }
}

impl Config {
    /// Loads configuration, degrading to defaults on any failure.
    pub fn load(path: &Path) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(_) => {
                warn!(
                    "Config file '{}' not found, using defaults with no providers",
                    path.display()
                );
                return Self::default();
            }
        };

        match toml::from_str(&text) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to parse config '{}': {e}; using defaults with no providers",
                    path.display()
                );
                Self::default()
            }
        }
    }

    /// Provider launch specs in stable name order.
    pub fn provider_launches(&self) -> Vec<(String, ProviderLaunch)> {
        self.providers
            .iter()
            .map(|(name, provider)| {
                (
                    name.clone(),
                    ProviderLaunch {
                        command: provider.command.clone(),
                        args: provider.args.clone(),
                        env: provider.env.clone(),
                    },
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn missing_file_yields_defaults_with_no_providers() {
        let config = Config::load(Path::new("/nonexistent/tollgate.toml"));
        assert!(config.providers.is_empty());
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.web.port, 8000);
    }

    #[test]
    fn malformed_file_yields_defaults_with_no_providers() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(b"[agent\nmodel = broken")
            .expect("write garbage");

        let config = Config::load(file.path());
        assert!(config.providers.is_empty());
        assert_eq!(config.agent.model, "gpt-4o-mini");
    }

    #[test]
    fn parses_provider_table_into_launch_specs() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(
            br#"
[agent]
model = "gpt-4o"
max_iterations = 5

[providers.anime]
command = "python"
args = ["anime_tracker.py"]

[providers.timer]
command = "python"
args = ["timer_server.py"]
env = { TZ = "UTC" }
"#,
        )
        .expect("write config");

        let config = Config::load(file.path());
        assert_eq!(config.agent.model, "gpt-4o");
        assert_eq!(config.agent.max_iterations, 5);
        // Unset sections fall back to defaults.
        assert_eq!(config.web.port, 8000);

        let launches = config.provider_launches();
        assert_eq!(launches.len(), 2);
        assert_eq!(launches[0].0, "anime");
        assert_eq!(launches[0].1.command, "python");
        assert_eq!(launches[1].0, "timer");
        assert_eq!(launches[1].1.env.get("TZ").map(String::as_str), Some("UTC"));
    }
}
