//! Shared SQLite connection handle and schema creation.

use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;

use crate::Result;

/// Cloneable handle to the single database connection.
///
/// SQLite connections are not `Sync`; every store holds a clone of this
/// handle and takes the mutex for the duration of one statement.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run one store operation against the connection.
    pub fn with<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        Ok(f(&conn)?)
    }
}

/// Current epoch time as fractional seconds, the unit used by every
/// timestamp column.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS app_state (
          key TEXT PRIMARY KEY,
          value TEXT
        );

        CREATE TABLE IF NOT EXISTS voices (
          voice_id TEXT PRIMARY KEY,
          gender TEXT,
          voice_name TEXT NOT NULL,
          voice_description TEXT,
          is_global INTEGER NOT NULL DEFAULT 0,
          pack_id TEXT,
          created_at REAL
        );

        CREATE TABLE IF NOT EXISTS experiences (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          prompt TEXT NOT NULL,
          short_description TEXT,
          tags TEXT,
          is_visible INTEGER NOT NULL DEFAULT 1,
          is_global INTEGER NOT NULL DEFAULT 0,
          voice_id TEXT NOT NULL,
          kind TEXT NOT NULL DEFAULT 'personality',
          img_src TEXT,
          pack_id TEXT,
          created_at REAL
        );
        CREATE INDEX IF NOT EXISTS idx_experiences_kind ON experiences(kind);
        CREATE INDEX IF NOT EXISTS idx_experiences_pack ON experiences(pack_id);

        CREATE TABLE IF NOT EXISTS sessions (
          id TEXT PRIMARY KEY,
          started_at REAL NOT NULL,
          ended_at REAL,
          duration_sec REAL,
          client_kind TEXT NOT NULL,
          user_id TEXT,
          personality_id TEXT
        );

        CREATE TABLE IF NOT EXISTS conversations (
          id TEXT PRIMARY KEY,
          role TEXT NOT NULL,
          transcript TEXT NOT NULL,
          timestamp REAL NOT NULL,
          session_id TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_session ON conversations(session_id);

        CREATE TABLE IF NOT EXISTS users (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          age INTEGER,
          about_you TEXT NOT NULL DEFAULT '',
          user_type TEXT NOT NULL DEFAULT 'family',
          avatar_emoji TEXT,
          current_personality_id TEXT,
          current_voice_id TEXT,
          settings_json TEXT
        );

        CREATE TABLE IF NOT EXISTS packs (
          id TEXT PRIMARY KEY,
          name TEXT NOT NULL,
          version TEXT NOT NULL,
          author TEXT,
          description TEXT,
          installed_at REAL NOT NULL,
          is_enabled INTEGER NOT NULL DEFAULT 1
        );
        "#,
    )
}
