//! Local relational store.
//!
//! One SQLite database holds settings, users, experiences, voices,
//! sessions, the conversation log and installed content packs. Each
//! concern has its own store type implementing its own trait; `Storage`
//! composes them by delegation over a shared connection handle.
//!
//! All operations are short-lived and independently committed — there
//! are no transactions spanning the turn state machine, so a crash
//! mid-turn can leave a user entry without its assistant reply.

pub mod conversations;
pub mod db;
pub mod error;
pub mod experiences;
pub mod models;
pub mod packs;
pub mod sessions;
pub mod settings;
pub mod users;
pub mod voices;

pub use conversations::{ConversationLog, SqliteConversations};
pub use db::Db;
pub use error::StorageError;
pub use experiences::{ExperiencePatch, ExperienceStore, NewExperience, SqliteExperiences};
pub use models::{
    ConversationEntry, DevicePatch, DeviceStatus, Experience, ExperienceKind, Pack, Preferences,
    ProfileEntry, SessionRecord, UserRecord, Voice,
};
pub use packs::{PackManifest, PackStore, SqlitePacks};
pub use sessions::{SessionStore, SqliteSessions};
pub use settings::{SettingsStore, SqliteSettings};
pub use users::{SqliteUsers, UserPatch, UserStore};
pub use voices::{SqliteVoices, VoiceStore};

pub type Result<T> = std::result::Result<T, StorageError>;

/// The composed store handed to the server and the turn pipeline.
pub struct Storage {
    pub settings: SqliteSettings,
    pub users: SqliteUsers,
    pub experiences: SqliteExperiences,
    pub voices: SqliteVoices,
    pub sessions: SqliteSessions,
    pub conversations: SqliteConversations,
    pub packs: SqlitePacks,
}

impl Storage {
    /// Open (creating if needed) the database at `path` and initialize
    /// the schema.
    pub fn open(path: &str) -> Result<Self> {
        let db = Db::open(path)?;
        Ok(Self::with_db(db))
    }

    /// Ephemeral in-memory store, used by tests.
    pub fn in_memory() -> Result<Self> {
        let db = Db::open(":memory:")?;
        Ok(Self::with_db(db))
    }

    fn with_db(db: Db) -> Self {
        Self {
            settings: SqliteSettings::new(db.clone()),
            users: SqliteUsers::new(db.clone()),
            experiences: SqliteExperiences::new(db.clone()),
            voices: SqliteVoices::new(db.clone()),
            sessions: SqliteSessions::new(db.clone()),
            conversations: SqliteConversations::new(db.clone()),
            packs: SqlitePacks::new(db),
        }
    }

    /// Seed a default voice and personality when the tables are empty so
    /// a fresh install can hold a conversation immediately.
    pub fn seed_defaults(&self) -> Result<()> {
        if self.voices.list(true)?.is_empty() {
            self.voices.upsert(
                "ember",
                "Ember",
                None,
                Some("Warm, even narrator voice"),
                true,
            )?;
            tracing::info!("Seeded default voice");
        }
        if self
            .experiences
            .list(true, Some(ExperienceKind::Personality))?
            .is_empty()
        {
            self.experiences.create(NewExperience {
                name: "Companion".to_string(),
                prompt: "You are a friendly, curious companion who enjoys everyday conversation."
                    .to_string(),
                short_description: "A friendly everyday companion".to_string(),
                tags: vec![],
                voice_id: "ember".to_string(),
                kind: ExperienceKind::Personality,
                is_global: true,
                img_src: None,
            })?;
            tracing::info!("Seeded default personality");
        }
        Ok(())
    }

    /// True once seed data exists; part of the readiness probe.
    pub fn is_seeded(&self) -> bool {
        let voices = self.voices.list(true).map(|v| v.len()).unwrap_or(0);
        let personalities = self
            .experiences
            .list(true, Some(ExperienceKind::Personality))
            .map(|v| v.len())
            .unwrap_or(0);
        voices > 0 && personalities > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_defaults_idempotent() {
        let storage = Storage::in_memory().unwrap();
        assert!(!storage.is_seeded());
        storage.seed_defaults().unwrap();
        assert!(storage.is_seeded());
        let voices = storage.voices.list(true).unwrap().len();
        storage.seed_defaults().unwrap();
        assert_eq!(storage.voices.list(true).unwrap().len(), voices);
    }
}
