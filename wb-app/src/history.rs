//! Conversation history and customer records, keyed by conversation.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Mutex};
use wb_channels::{ConversationKey, InboundMessage};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub from_bot: bool,
    pub text: String,
    #[serde(default)]
    pub media_kind: Option<String>,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    #[cfg(test)]
    pub fn customer(text: impl Into<String>) -> Self {
        Self {
            from_bot: false,
            text: text.into(),
            media_kind: None,
            at: Utc::now(),
        }
    }

    pub fn bot(text: impl Into<String>) -> Self {
        Self {
            from_bot: true,
            text: text.into(),
            media_kind: None,
            at: Utc::now(),
        }
    }

    pub fn from_inbound(message: &InboundMessage) -> Self {
        Self {
            from_bot: false,
            text: message.text.clone(),
            media_kind: message.media_kind.clone(),
            at: message.received_at,
        }
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append(&self, key: &ConversationKey, entry: HistoryEntry) -> Result<()>;

    /// Entries in insertion order; empty for an unknown conversation.
    async fn history(&self, key: &ConversationKey) -> Result<Vec<HistoryEntry>>;
}

#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    conversations: DashMap<ConversationKey, Vec<HistoryEntry>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn append(&self, key: &ConversationKey, entry: HistoryEntry) -> Result<()> {
        self.conversations.entry(key.clone()).or_default().push(entry);
        Ok(())
    }

    async fn history(&self, key: &ConversationKey) -> Result<Vec<HistoryEntry>> {
        Ok(self
            .conversations
            .get(key)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }
}

/// SQLite-backed store. Calls run on the blocking pool.
pub struct SqliteHistoryStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteHistoryStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow::anyhow!("create {}: {e}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| anyhow::anyhow!("open history db {}: {e}", path.display()))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
CREATE TABLE IF NOT EXISTS customers (
    session_id TEXT NOT NULL,
    phone TEXT NOT NULL,
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL,
    PRIMARY KEY (session_id, phone)
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    phone TEXT NOT NULL,
    from_bot INTEGER NOT NULL,
    body TEXT NOT NULL,
    media_kind TEXT,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS messages_by_conversation ON messages (session_id, phone, id);
"#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| anyhow::anyhow!("history db mutex poisoned"))?;
            f(&mut guard)
        })
        .await?
    }
}

#[async_trait]
impl HistoryStore for SqliteHistoryStore {
    async fn append(&self, key: &ConversationKey, entry: HistoryEntry) -> Result<()> {
        let session = key.session.to_string();
        let phone = key.phone.to_string();
        self.with_conn(move |conn| {
            let at = entry.at.to_rfc3339();
            let tx = conn.transaction()?;
            tx.execute(
                r#"
INSERT INTO messages (session_id, phone, from_bot, body, media_kind, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6)
"#,
                params![
                    session,
                    phone,
                    entry.from_bot,
                    entry.text,
                    entry.media_kind,
                    at
                ],
            )?;
            if !entry.from_bot {
                tx.execute(
                    r#"
INSERT INTO customers (session_id, phone, first_seen_at, last_seen_at)
VALUES (?1, ?2, ?3, ?3)
ON CONFLICT(session_id, phone) DO UPDATE
SET last_seen_at = excluded.last_seen_at
"#,
                    params![session, phone, at],
                )?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn history(&self, key: &ConversationKey) -> Result<Vec<HistoryEntry>> {
        let session = key.session.to_string();
        let phone = key.phone.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                r#"
SELECT from_bot, body, media_kind, created_at
  FROM messages
 WHERE session_id = ?1
   AND phone = ?2
 ORDER BY id ASC
"#,
            )?;
            let rows = stmt.query_map(params![session, phone], |row| {
                Ok((
                    row.get::<_, bool>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (from_bot, text, media_kind, at) = row?;
                out.push(HistoryEntry {
                    from_bot,
                    text,
                    media_kind,
                    at: parse_timestamp(&at)?,
                });
            }
            Ok(out)
        })
        .await
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| anyhow::anyhow!("invalid stored timestamp {raw:?}: {e}"))
}
