//! Persisted voice sessions: append-then-update records with an
//! idempotent close.

use crate::db::{now_ts, Db};
use crate::models::SessionRecord;
use crate::Result;
use rusqlite::OptionalExtension;

pub trait SessionStore {
    /// Record session start. Re-starting an existing id is a no-op apart
    /// from backfilling a missing user/personality.
    fn start(
        &self,
        session_id: &str,
        client_kind: &str,
        user_id: Option<&str>,
        personality_id: Option<&str>,
    ) -> Result<()>;

    /// Close a session. Idempotent: the first call sets `ended_at` and
    /// `duration_sec`; later calls leave them untouched.
    fn end(&self, session_id: &str) -> Result<()>;

    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>>;

    /// Sessions newest first, optionally filtered by user.
    fn list(&self, limit: i64, offset: i64, user_id: Option<&str>) -> Result<Vec<SessionRecord>>;
}

#[derive(Clone)]
pub struct SqliteSessions {
    db: Db,
}

impl SqliteSessions {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn row_to_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<SessionRecord> {
    Ok(SessionRecord {
        id: row.get("id")?,
        started_at: row.get("started_at")?,
        ended_at: row.get("ended_at")?,
        duration_sec: row.get("duration_sec")?,
        client_kind: row.get("client_kind")?,
        user_id: row.get("user_id")?,
        personality_id: row.get("personality_id")?,
    })
}

impl SessionStore for SqliteSessions {
    fn start(
        &self,
        session_id: &str,
        client_kind: &str,
        user_id: Option<&str>,
        personality_id: Option<&str>,
    ) -> Result<()> {
        let started_at = now_ts();
        self.db.with(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO sessions
                   (id, started_at, ended_at, duration_sec, client_kind, user_id, personality_id)
                 VALUES (?1, ?2, NULL, NULL, ?3, ?4, ?5)",
                rusqlite::params![session_id, started_at, client_kind, user_id, personality_id],
            )?;
            if user_id.is_some() || personality_id.is_some() {
                conn.execute(
                    "UPDATE sessions
                     SET user_id = COALESCE(user_id, ?1),
                         personality_id = COALESCE(personality_id, ?2)
                     WHERE id = ?3",
                    rusqlite::params![user_id, personality_id, session_id],
                )?;
            }
            Ok(())
        })
    }

    fn end(&self, session_id: &str) -> Result<()> {
        self.db.with(|conn| {
            let open: Option<f64> = conn
                .query_row(
                    "SELECT started_at FROM sessions WHERE id = ?1 AND ended_at IS NULL",
                    [session_id],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(started_at) = open {
                let ended_at = now_ts();
                conn.execute(
                    "UPDATE sessions SET ended_at = ?1, duration_sec = ?2 WHERE id = ?3",
                    rusqlite::params![ended_at, ended_at - started_at, session_id],
                )?;
            }
            Ok(())
        })
    }

    fn get(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.db.with(|conn| {
            conn.query_row(
                "SELECT * FROM sessions WHERE id = ?1",
                [session_id],
                row_to_session,
            )
            .optional()
        })
    }

    fn list(&self, limit: i64, offset: i64, user_id: Option<&str>) -> Result<Vec<SessionRecord>> {
        self.db.with(|conn| {
            if let Some(uid) = user_id {
                let mut stmt = conn.prepare(
                    "SELECT * FROM sessions WHERE user_id = ?1
                     ORDER BY started_at DESC LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt.query_map(rusqlite::params![uid, limit, offset], row_to_session)?;
                rows.collect()
            } else {
                let mut stmt = conn.prepare(
                    "SELECT * FROM sessions ORDER BY started_at DESC LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt.query_map([limit, offset], row_to_session)?;
                rows.collect()
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteSessions {
        SqliteSessions::new(Db::open(":memory:").unwrap())
    }

    #[test]
    fn test_start_and_end() {
        let sessions = store();
        sessions.start("s1", "desktop", Some("u1"), None).unwrap();
        let record = sessions.get("s1").unwrap().unwrap();
        assert!(record.ended_at.is_none());
        assert_eq!(record.client_kind, "desktop");

        sessions.end("s1").unwrap();
        let record = sessions.get("s1").unwrap().unwrap();
        assert!(record.ended_at.is_some());
        assert!(record.duration_sec.unwrap() >= 0.0);
    }

    #[test]
    fn test_end_is_idempotent() {
        let sessions = store();
        sessions.start("s1", "device", None, None).unwrap();
        sessions.end("s1").unwrap();
        let first = sessions.get("s1").unwrap().unwrap();
        sessions.end("s1").unwrap();
        let second = sessions.get("s1").unwrap().unwrap();
        assert_eq!(first.ended_at, second.ended_at);
        assert_eq!(first.duration_sec, second.duration_sec);
    }

    #[test]
    fn test_end_unknown_session_is_noop() {
        let sessions = store();
        sessions.end("missing").unwrap();
        assert!(sessions.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_restart_backfills_missing_fields_only() {
        let sessions = store();
        sessions.start("s1", "desktop", None, None).unwrap();
        sessions.start("s1", "desktop", Some("u1"), Some("p1")).unwrap();
        let record = sessions.get("s1").unwrap().unwrap();
        assert_eq!(record.user_id.as_deref(), Some("u1"));
        assert_eq!(record.personality_id.as_deref(), Some("p1"));

        // Existing values are not overwritten.
        sessions.start("s1", "desktop", Some("u2"), None).unwrap();
        let record = sessions.get("s1").unwrap().unwrap();
        assert_eq!(record.user_id.as_deref(), Some("u1"));
    }
}
