//! Conversation log: two entries per turn (user, assistant) keyed by
//! session.

use crate::db::{now_ts, Db};
use crate::models::ConversationEntry;
use crate::Result;
use uuid::Uuid;

pub trait ConversationLog {
    /// Append one entry. Best-effort at the call site: the pipeline logs
    /// failures and continues.
    fn log_turn(&self, role: &str, transcript: &str, session_id: Option<&str>)
        -> Result<ConversationEntry>;

    /// Full history of one session, oldest first.
    fn history(&self, session_id: &str) -> Result<Vec<ConversationEntry>>;

    /// Recent entries across sessions, newest first.
    fn recent(&self, limit: i64, offset: i64) -> Result<Vec<ConversationEntry>>;
}

#[derive(Clone)]
pub struct SqliteConversations {
    db: Db,
}

impl SqliteConversations {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationEntry> {
    Ok(ConversationEntry {
        id: row.get("id")?,
        role: row.get("role")?,
        transcript: row.get("transcript")?,
        timestamp: row.get("timestamp")?,
        session_id: row.get("session_id")?,
    })
}

impl ConversationLog for SqliteConversations {
    fn log_turn(
        &self,
        role: &str,
        transcript: &str,
        session_id: Option<&str>,
    ) -> Result<ConversationEntry> {
        let entry = ConversationEntry {
            id: Uuid::new_v4().to_string(),
            role: role.to_string(),
            transcript: transcript.to_string(),
            timestamp: now_ts(),
            session_id: session_id.map(str::to_string),
        };
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, role, transcript, timestamp, session_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    entry.id,
                    entry.role,
                    entry.transcript,
                    entry.timestamp,
                    entry.session_id
                ],
            )
        })?;
        Ok(entry)
    }

    fn history(&self, session_id: &str) -> Result<Vec<ConversationEntry>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM conversations WHERE session_id = ?1
                 ORDER BY timestamp ASC, rowid ASC",
            )?;
            let rows = stmt.query_map([session_id], row_to_entry)?;
            rows.collect()
        })
    }

    fn recent(&self, limit: i64, offset: i64) -> Result<Vec<ConversationEntry>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM conversations ORDER BY timestamp DESC, rowid DESC
                 LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map([limit, offset], row_to_entry)?;
            rows.collect()
        })
    }
}
