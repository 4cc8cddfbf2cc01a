use thiserror::Error;

/// Top-level error type
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration loading/validation error.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Tool provider connection/invocation error.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Approval handshake error.
    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    /// Model provider error.
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Database/migration error.
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Operator channel error.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Internal protocol type error.
    #[error("Proto error: {0}")]
    Proto(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field has an invalid value and reason.
    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    /// Filesystem read error.
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parse error.
    #[error("TOML parse error: {0}")]
    Toml(String),
}

/// Tool provider errors
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Child process could not be spawned.
    #[error("Failed to launch provider: {0}")]
    Spawn(String),

    /// Capability handshake failed or timed out.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Qualified name does not resolve to a live provider/tool.
    #[error("Tool not found: {0}")]
    NotFound(String),

    /// Provider was live but the invocation faulted.
    #[error("Provider '{provider}' failed: {reason}")]
    Invocation { provider: String, reason: String },

    /// Call arguments do not satisfy the provider-declared schema.
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// Connection to the provider process has closed.
    #[error("Provider connection closed")]
    Closed,

    /// Malformed frame on the provider wire.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Filesystem/process IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Approval handshake errors
#[derive(Debug, Error)]
pub enum ApprovalError {
    /// The call id is unknown or its decision was already consumed.
    #[error("Unknown or already-resolved call id: {0}")]
    UnknownCallId(String),
}

/// Model provider errors
#[derive(Debug, Error)]
pub enum LlmError {
    /// Remote API failure.
    #[error("{0}")]
    Api(String),

    /// Provider response schema/content was invalid.
    #[error("Invalid response from LLM: {0}")]
    InvalidResponse(String),

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Database errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// SQLx operation error.
    #[error("SQLx error: {0}")]
    Sqlx(String),

    /// Migration execution error.
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Operator channel errors
#[derive(Debug, Error)]
pub enum ChannelError {
    /// Listener could not be bound.
    #[error("Bind failed: {0}")]
    Bind(String),

    /// Sending a frame failed.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Channel has been closed.
    #[error("Channel closed")]
    Closed,

    /// Console/terminal IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Internal proto errors
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Invalid role string value.
    #[error("Invalid role: {0}")]
    InvalidRole(String),

    /// Generic serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_provider_error_into_top_level_error() {
        let err: Error = ProviderError::NotFound("anime_search".to_string()).into();
        assert!(err.to_string().contains("Provider error"));
    }

    #[test]
    fn approval_error_names_the_call_id() {
        let err = ApprovalError::UnknownCallId("call-9".to_string());
        assert!(err.to_string().contains("call-9"));
    }

    #[test]
    fn invocation_error_names_provider_and_reason() {
        let err = ProviderError::Invocation {
            provider: "anime".to_string(),
            reason: "process exited".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("anime"));
        assert!(rendered.contains("process exited"));
    }

    #[test]
    fn wraps_llm_and_database_errors() {
        let llm: Error = LlmError::Api("503".to_string()).into();
        assert!(llm.to_string().contains("LLM error"));

        let db: Error = DatabaseError::Migration("bad sql".to_string()).into();
        assert!(db.to_string().contains("Database error"));
    }

    #[test]
    fn wraps_channel_and_config_errors() {
        let channel: Error = ChannelError::Closed.into();
        assert!(channel.to_string().contains("Channel error"));

        let config: Error = ConfigError::Toml("unexpected eof".to_string()).into();
        assert!(config.to_string().contains("Config error"));
    }
}
