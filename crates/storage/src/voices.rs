//! Voice records.

use crate::db::{now_ts, Db};
use crate::models::Voice;
use crate::Result;
use rusqlite::OptionalExtension;

pub trait VoiceStore {
    fn exists(&self, voice_id: &str) -> Result<bool>;
    fn get(&self, voice_id: &str) -> Result<Option<Voice>>;
    fn list(&self, include_non_global: bool) -> Result<Vec<Voice>>;
    fn upsert(
        &self,
        voice_id: &str,
        voice_name: &str,
        gender: Option<&str>,
        description: Option<&str>,
        is_global: bool,
    ) -> Result<Voice>;
    /// Global fallback: the oldest registered voice.
    fn default_voice_id(&self) -> Result<Option<String>>;
}

#[derive(Clone)]
pub struct SqliteVoices {
    db: Db,
}

impl SqliteVoices {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn row_to_voice(row: &rusqlite::Row<'_>) -> rusqlite::Result<Voice> {
    Ok(Voice {
        voice_id: row.get("voice_id")?,
        gender: row.get("gender")?,
        voice_name: row.get("voice_name")?,
        voice_description: row.get("voice_description")?,
        is_global: row.get("is_global")?,
        pack_id: row.get("pack_id")?,
        created_at: row.get("created_at")?,
    })
}

impl VoiceStore for SqliteVoices {
    fn exists(&self, voice_id: &str) -> Result<bool> {
        let found: Option<i64> = self.db.with(|conn| {
            conn.query_row(
                "SELECT 1 FROM voices WHERE voice_id = ?1 LIMIT 1",
                [voice_id],
                |row| row.get(0),
            )
            .optional()
        })?;
        Ok(found.is_some())
    }

    fn get(&self, voice_id: &str) -> Result<Option<Voice>> {
        self.db.with(|conn| {
            conn.query_row("SELECT * FROM voices WHERE voice_id = ?1", [voice_id], row_to_voice)
                .optional()
        })
    }

    fn list(&self, include_non_global: bool) -> Result<Vec<Voice>> {
        self.db.with(|conn| {
            let sql = if include_non_global {
                "SELECT * FROM voices ORDER BY created_at DESC, rowid DESC"
            } else {
                "SELECT * FROM voices WHERE is_global = 1 ORDER BY created_at DESC, rowid DESC"
            };
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([], row_to_voice)?;
            rows.collect()
        })
    }

    fn upsert(
        &self,
        voice_id: &str,
        voice_name: &str,
        gender: Option<&str>,
        description: Option<&str>,
        is_global: bool,
    ) -> Result<Voice> {
        let created_at = now_ts();
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO voices (voice_id, gender, voice_name, voice_description, is_global, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(voice_id) DO UPDATE SET
                   gender = excluded.gender,
                   voice_name = excluded.voice_name,
                   voice_description = excluded.voice_description,
                   is_global = excluded.is_global,
                   created_at = COALESCE(voices.created_at, excluded.created_at)",
                rusqlite::params![voice_id, gender, voice_name, description, is_global, created_at],
            )
        })?;
        Ok(self.get(voice_id)?.expect("voice just upserted"))
    }

    fn default_voice_id(&self) -> Result<Option<String>> {
        self.db.with(|conn| {
            conn.query_row(
                "SELECT voice_id FROM voices ORDER BY created_at ASC, rowid ASC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteVoices {
        SqliteVoices::new(Db::open(":memory:").unwrap())
    }

    #[test]
    fn test_upsert_and_exists() {
        let voices = store();
        assert!(!voices.exists("ember").unwrap());
        voices.upsert("ember", "Ember", None, None, true).unwrap();
        assert!(voices.exists("ember").unwrap());

        // Upsert keeps the original created_at.
        let first = voices.get("ember").unwrap().unwrap();
        voices.upsert("ember", "Ember II", None, None, true).unwrap();
        let second = voices.get("ember").unwrap().unwrap();
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.voice_name, "Ember II");
    }

    #[test]
    fn test_default_voice_is_oldest() {
        let voices = store();
        assert!(voices.default_voice_id().unwrap().is_none());
        voices.upsert("first", "First", None, None, true).unwrap();
        voices.upsert("second", "Second", None, None, true).unwrap();
        assert_eq!(voices.default_voice_id().unwrap().as_deref(), Some("first"));
    }
}
