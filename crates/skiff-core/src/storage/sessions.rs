//! Session CRUD operations.
//!
//! Message content is stored as JSON-serialized `Vec<Content>` for full
//! fidelity (thinking blocks, tool uses, tool results all survive a
//! round trip).

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use super::database::Database;
use crate::ai::types::{Content, Message, Role};

/// Session metadata for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    pub title: String,
    pub git_root: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A fully loaded session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub id: String,
    pub title: String,
    pub git_root: Option<PathBuf>,
    pub messages: Vec<Message>,
}

/// Store for session persistence. Cheap to clone; each operation opens
/// its own connection.
#[derive(Debug, Clone)]
pub struct SessionStore {
    db_path: PathBuf,
}

impl SessionStore {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    /// Save a session, replacing its stored messages.
    pub fn save(
        &self,
        id: &str,
        messages: &[Message],
        title: &str,
        git_root: Option<&Path>,
    ) -> Result<()> {
        let db = Database::new(&self.db_path)?;
        let now = Utc::now().to_rfc3339();
        let git_root = git_root.map(|p| p.to_string_lossy().to_string());

        db.conn().execute(
            "INSERT INTO sessions (id, title, git_root, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                git_root = excluded.git_root,
                updated_at = excluded.updated_at",
            params![id, title, git_root, now],
        )?;

        db.conn()
            .execute("DELETE FROM messages WHERE session_id = ?1", params![id])?;

        for message in messages {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            let content = serde_json::to_string(&message.content)?;
            db.conn().execute(
                "INSERT INTO messages (session_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![id, role, content, now],
            )?;
        }

        Ok(())
    }

    /// Load a session with its full message history.
    pub fn load(&self, id: &str) -> Result<Option<SessionSnapshot>> {
        let db = Database::new(&self.db_path)?;

        let header = db
            .conn()
            .query_row(
                "SELECT title, git_root FROM sessions WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                    ))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        let Some((title, git_root)) = header else {
            return Ok(None);
        };

        let mut stmt = db
            .conn()
            .prepare("SELECT role, content FROM messages WHERE session_id = ?1 ORDER BY id")?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content) = row?;
            let role = match role.as_str() {
                "assistant" => Role::Assistant,
                _ => Role::User,
            };
            let content: Vec<Content> = serde_json::from_str(&content)?;
            messages.push(Message { role, content });
        }

        Ok(Some(SessionSnapshot {
            id: id.to_string(),
            title,
            git_root: git_root.map(PathBuf::from),
            messages,
        }))
    }

    /// List sessions, newest first, optionally filtered by git root.
    pub fn list(&self, git_root: Option<&Path>) -> Result<Vec<SessionInfo>> {
        let db = Database::new(&self.db_path)?;

        let map_row = |row: &rusqlite::Row| -> rusqlite::Result<SessionInfo> {
            let updated_at: String = row.get(3)?;
            Ok(SessionInfo {
                id: row.get(0)?,
                title: row.get(1)?,
                git_root: row.get(2)?,
                updated_at: DateTime::parse_from_rfc3339(&updated_at)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            })
        };

        let sessions = if let Some(root) = git_root {
            let root = root.to_string_lossy().to_string();
            let mut stmt = db.conn().prepare(
                "SELECT id, title, git_root, updated_at FROM sessions
                 WHERE git_root = ?1 ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map(params![root], map_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let mut stmt = db.conn().prepare(
                "SELECT id, title, git_root, updated_at FROM sessions
                 ORDER BY updated_at DESC",
            )?;
            let rows = stmt.query_map([], map_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        Ok(sessions)
    }

    /// Derive a session title from the first user message. Truncates at
    /// a word boundary; char-based indexing for UTF-8 safety.
    pub fn derive_title(content: &str) -> String {
        let first_line = content.lines().next().unwrap_or("").trim();
        let char_count = first_line.chars().count();

        if char_count <= 50 {
            return first_line.to_string();
        }

        let first_50: String = first_line.chars().take(50).collect();
        if let Some(last_space) = first_50.rfind(char::is_whitespace) {
            let char_idx = first_50[..last_space].chars().count();
            if char_idx > 20 {
                let prefix: String = first_line.chars().take(char_idx).collect();
                return format!("{}...", prefix.trim_end());
            }
        }

        let truncated: String = first_line.chars().take(47).collect();
        format!("{}...", truncated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("sessions.db"));
        (store, dir)
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::user("fix the failing test"),
            Message {
                role: Role::Assistant,
                content: vec![
                    Content::Thinking {
                        thinking: "look at the test first".to_string(),
                        signature: "sig".to_string(),
                    },
                    Content::ToolUse {
                        id: "tu_1".to_string(),
                        name: "read".to_string(),
                        input: json!({"path": "tests/it.rs"}),
                    },
                ],
            },
            Message {
                role: Role::User,
                content: vec![Content::ToolResult {
                    tool_use_id: "tu_1".to_string(),
                    output: json!("fn test() { assert!(false) }"),
                    is_error: None,
                }],
            },
        ]
    }

    #[test]
    fn save_load_round_trip_preserves_blocks() {
        let (store, _dir) = store();
        let messages = sample_messages();

        store
            .save("s1", &messages, "fix the failing test", None)
            .unwrap();
        let loaded = store.load("s1").unwrap().unwrap();

        assert_eq!(loaded.title, "fix the failing test");
        assert_eq!(loaded.messages, messages);
    }

    #[test]
    fn save_replaces_prior_messages() {
        let (store, _dir) = store();
        store
            .save("s1", &sample_messages(), "title", None)
            .unwrap();

        let shorter = vec![Message::user("just this")];
        store.save("s1", &shorter, "title", None).unwrap();

        let loaded = store.load("s1").unwrap().unwrap();
        assert_eq!(loaded.messages, shorter);
    }

    #[test]
    fn load_missing_session_is_none() {
        let (store, _dir) = store();
        assert!(store.load("nope").unwrap().is_none());
    }

    #[test]
    fn list_filters_by_git_root() {
        let (store, _dir) = store();
        let msgs = vec![Message::user("hello")];
        store
            .save("a", &msgs, "a", Some(Path::new("/repo/one")))
            .unwrap();
        store
            .save("b", &msgs, "b", Some(Path::new("/repo/two")))
            .unwrap();
        store.save("c", &msgs, "c", None).unwrap();

        let all = store.list(None).unwrap();
        assert_eq!(all.len(), 3);

        let one = store.list(Some(Path::new("/repo/one"))).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].id, "a");
    }

    #[test]
    fn derive_title_truncates_at_word_boundary() {
        assert_eq!(SessionStore::derive_title("short prompt"), "short prompt");

        let long = "please refactor the authentication module to use the new token format";
        let title = SessionStore::derive_title(long);
        assert!(title.ends_with("..."));
        assert!(title.chars().count() <= 53);

        // Multi-line prompts use only the first line.
        assert_eq!(SessionStore::derive_title("one\ntwo\nthree"), "one");
    }
}
