//! SQLite-backed conversation transcript store.
//!
//! The orchestration loop treats this as an opaque append/read-recent log:
//! it reads the most recent window oldest-first and appends new entries, but
//! never mutates history in place.

use proto::{AgentMessage, DatabaseError, Role, SessionId};
use sqlx::{Row, sqlite::SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// SQLite-backed transcript store
pub struct TranscriptStore {
    pool: SqlitePool,
}

impl TranscriptStore {
    /// Open (or create) the SQLite database and run migrations
    pub async fn open(db_path: &str) -> Result<Self, DatabaseError> {
        // Expand ~ in path
        let path = if db_path.starts_with("~") {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            db_path.replacen("~", &home, 1)
        } else {
            db_path.to_string()
        };

        // Ensure parent directory exists
        if let Some(parent) = std::path::Path::new(&path).parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        }

        let pool = SqlitePool::connect(&format!("sqlite:{path}?mode=rwc"))
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        let migrations_dir =
            std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../migrations");
        let migrator = sqlx::migrate::Migrator::new(migrations_dir.as_path())
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        migrator
            .run(&pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))?;

        info!("Transcript store opened: {path}");
        Ok(Self { pool })
    }

    /// Append a message to the transcript
    pub async fn append(&self, msg: &AgentMessage) -> Result<(), DatabaseError> {
        let tool_calls_json = msg
            .tool_calls
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        sqlx::query(
            "INSERT OR REPLACE INTO messages (id, session_id, role, content, tool_call_id, tool_name, tool_calls_json, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&msg.id)
        .bind(msg.session_id.as_str())
        .bind(msg.role.to_string())
        .bind(&msg.content)
        .bind(&msg.tool_call_id)
        .bind(&msg.tool_name)
        .bind(tool_calls_json)
        .bind(msg.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        debug!("Appended message: {} (role: {})", msg.id, msg.role);
        Ok(())
    }

    /// Ensure a session exists (create if not)
    pub async fn ensure_session(
        &self,
        session_id: &SessionId,
        channel: &str,
    ) -> Result<(), DatabaseError> {
        let now = chrono::Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT OR IGNORE INTO sessions (id, channel, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(session_id.as_str())
        .bind(channel)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        Ok(())
    }

    /// Load the most recent `limit` messages for a session, oldest first
    pub async fn recent(
        &self,
        session_id: &SessionId,
        limit: usize,
    ) -> Result<Vec<AgentMessage>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT id, session_id, role, content, tool_call_id, tool_name, tool_calls_json, created_at \
             FROM messages WHERE session_id = ? \
             ORDER BY created_at DESC, rowid DESC LIMIT ?",
        )
        .bind(session_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;

        let mut messages: Vec<AgentMessage> = rows.into_iter().map(row_to_message).collect();
        messages.reverse();
        Ok(messages)
    }

    /// Delete every message in a session
    pub async fn clear_session(&self, session_id: &SessionId) -> Result<(), DatabaseError> {
        sqlx::query("DELETE FROM messages WHERE session_id = ?")
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        info!("Cleared transcript for session {session_id}");
        Ok(())
    }

    /// Bump a session's updated_at timestamp
    pub async fn touch_session(&self, session_id: &SessionId) -> Result<(), DatabaseError> {
        sqlx::query("UPDATE sessions SET updated_at = ? WHERE id = ?")
            .bind(chrono::Utc::now().to_rfc3339())
            .bind(session_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| DatabaseError::Sqlx(e.to_string()))?;
        Ok(())
    }
}

/// Maps a database row back into an [`AgentMessage`].
fn row_to_message(row: sqlx::sqlite::SqliteRow) -> AgentMessage {
    let role_str: String = row.get("role");
    let role = Role::from_str(&role_str).unwrap_or(Role::User);
    let created_at_str: String = row.get("created_at");
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at_str)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .unwrap_or_else(|_| chrono::Utc::now());
    let tool_calls_json: Option<String> = row.get("tool_calls_json");
    let tool_calls = tool_calls_json
        .as_deref()
        .and_then(|raw| serde_json::from_str::<Vec<proto::ToolCall>>(raw).ok());

    AgentMessage {
        id: row.get("id"),
        session_id: SessionId::from(row.get::<String, _>("session_id")),
        role,
        content: row.get("content"),
        tool_call_id: row.get("tool_call_id"),
        tool_name: row.get("tool_name"),
        tool_calls,
        created_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_temp_store() -> (TranscriptStore, tempfile::TempDir) {
        let tempdir = tempfile::tempdir().expect("tempdir");
        let db_path = tempdir.path().join("transcript.db");
        let store = TranscriptStore::open(&db_path.to_string_lossy())
            .await
            .expect("store should open");
        (store, tempdir)
    }

    #[tokio::test]
    async fn ensure_session_is_idempotent() {
        let (store, _tmp) = open_temp_store().await;
        let session = SessionId::from("session-a");

        store
            .ensure_session(&session, "web")
            .await
            .expect("first ensure");
        store
            .ensure_session(&session, "web")
            .await
            .expect("second ensure");
    }

    #[tokio::test]
    async fn append_and_recent_round_trip_in_order() {
        let (store, _tmp) = open_temp_store().await;
        let session = SessionId::from("session-b");
        store.ensure_session(&session, "web").await.expect("ensure");

        let user = AgentMessage::new(session.clone(), Role::User, "hello");
        let assistant = AgentMessage::assistant_tool_calls(
            session.clone(),
            "",
            vec![proto::ToolCall {
                id: "call-1".to_string(),
                name: "anime_search".to_string(),
                arguments: serde_json::json!({"title":"frieren"}),
            }],
        );
        let tool = AgentMessage::tool_result(session.clone(), "call-1", "anime_search", "found");
        store.append(&user).await.expect("append user");
        store.append(&assistant).await.expect("append assistant");
        store.append(&tool).await.expect("append tool");

        let loaded = store.recent(&session, 10).await.expect("recent");
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].role, Role::User);
        assert_eq!(loaded[1].role, Role::Assistant);
        assert_eq!(loaded[1].tool_calls.as_ref().map(Vec::len), Some(1));
        assert_eq!(loaded[2].role, Role::Tool);
        assert_eq!(loaded[2].tool_call_id.as_deref(), Some("call-1"));
    }

    #[tokio::test]
    async fn recent_returns_newest_window_oldest_first() {
        let (store, _tmp) = open_temp_store().await;
        let session = SessionId::from("session-c");
        store.ensure_session(&session, "web").await.expect("ensure");

        for i in 0..5 {
            let msg = AgentMessage::new(session.clone(), Role::User, format!("msg {i}"));
            store.append(&msg).await.expect("append");
        }

        let window = store.recent(&session, 2).await.expect("recent");
        assert_eq!(window.len(), 2);
        assert_eq!(window[0].content, "msg 3");
        assert_eq!(window[1].content, "msg 4");
    }

    #[tokio::test]
    async fn clear_session_removes_messages() {
        let (store, _tmp) = open_temp_store().await;
        let session = SessionId::from("session-d");
        store.ensure_session(&session, "web").await.expect("ensure");
        store
            .append(&AgentMessage::new(session.clone(), Role::User, "hi"))
            .await
            .expect("append");

        store.clear_session(&session).await.expect("clear");
        let loaded = store.recent(&session, 10).await.expect("recent");
        assert!(loaded.is_empty());
    }
}
