//! User records and their preference blobs.

use crate::db::Db;
use crate::models::{Preferences, UserRecord};
use crate::Result;
use rusqlite::OptionalExtension;
use uuid::Uuid;

/// Partial user update; `None` fields are left unchanged. Option fields
/// that can be cleared take `Some(None)`.
#[derive(Debug, Clone, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub age: Option<Option<i64>>,
    pub about_you: Option<String>,
    pub user_type: Option<String>,
    pub avatar_emoji: Option<Option<String>>,
    pub current_personality_id: Option<Option<String>>,
    pub current_voice_id: Option<Option<String>>,
    pub settings_json: Option<Option<String>>,
}

pub trait UserStore {
    fn list(&self) -> Result<Vec<UserRecord>>;
    fn get(&self, id: &str) -> Result<Option<UserRecord>>;
    fn create(
        &self,
        name: &str,
        age: Option<i64>,
        about_you: &str,
        avatar_emoji: Option<&str>,
    ) -> Result<UserRecord>;
    fn update(&self, id: &str, patch: UserPatch) -> Result<Option<UserRecord>>;
}

#[derive(Clone)]
pub struct SqliteUsers {
    db: Db,
}

impl SqliteUsers {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Parsed preferences for a user, with defaults when absent.
    pub fn preferences(&self, user: &UserRecord) -> Preferences {
        Preferences::parse(user.settings_json.as_deref())
    }

    pub fn save_preferences(&self, user_id: &str, prefs: &Preferences) -> Result<Option<UserRecord>> {
        let raw = serde_json::to_string(prefs)?;
        self.update(
            user_id,
            UserPatch {
                settings_json: Some(Some(raw)),
                ..Default::default()
            },
        )
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRecord> {
    Ok(UserRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        age: row.get("age")?,
        about_you: row.get::<_, Option<String>>("about_you")?.unwrap_or_default(),
        user_type: row
            .get::<_, Option<String>>("user_type")?
            .unwrap_or_else(|| "family".to_string()),
        avatar_emoji: row.get("avatar_emoji")?,
        current_personality_id: row.get("current_personality_id")?,
        current_voice_id: row.get("current_voice_id")?,
        settings_json: row.get("settings_json")?,
    })
}

impl UserStore for SqliteUsers {
    fn list(&self) -> Result<Vec<UserRecord>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM users ORDER BY rowid ASC")?;
            let rows = stmt.query_map([], row_to_user)?;
            rows.collect()
        })
    }

    fn get(&self, id: &str) -> Result<Option<UserRecord>> {
        self.db.with(|conn| {
            conn.query_row("SELECT * FROM users WHERE id = ?1", [id], row_to_user)
                .optional()
        })
    }

    fn create(
        &self,
        name: &str,
        age: Option<i64>,
        about_you: &str,
        avatar_emoji: Option<&str>,
    ) -> Result<UserRecord> {
        let id = Uuid::new_v4().to_string();
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, age, about_you, user_type, avatar_emoji)
                 VALUES (?1, ?2, ?3, ?4, 'family', ?5)",
                rusqlite::params![id, name, age, about_you, avatar_emoji],
            )
        })?;
        Ok(self.get(&id)?.expect("user just created"))
    }

    fn update(&self, id: &str, patch: UserPatch) -> Result<Option<UserRecord>> {
        let Some(current) = self.get(id)? else {
            return Ok(None);
        };
        self.db.with(|conn| {
            conn.execute(
                "UPDATE users SET
                   name = ?1, age = ?2, about_you = ?3, user_type = ?4, avatar_emoji = ?5,
                   current_personality_id = ?6, current_voice_id = ?7, settings_json = ?8
                 WHERE id = ?9",
                rusqlite::params![
                    patch.name.unwrap_or(current.name),
                    patch.age.unwrap_or(current.age),
                    patch.about_you.unwrap_or(current.about_you),
                    patch.user_type.unwrap_or(current.user_type),
                    patch.avatar_emoji.unwrap_or(current.avatar_emoji),
                    patch
                        .current_personality_id
                        .unwrap_or(current.current_personality_id),
                    patch.current_voice_id.unwrap_or(current.current_voice_id),
                    patch.settings_json.unwrap_or(current.settings_json),
                    id
                ],
            )
        })?;
        self.get(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteUsers {
        SqliteUsers::new(Db::open(":memory:").unwrap())
    }

    #[test]
    fn test_create_get_update() {
        let users = store();
        let user = users.create("Maya", Some(9), "loves space", None).unwrap();
        assert_eq!(user.user_type, "family");

        let updated = users
            .update(
                &user.id,
                UserPatch {
                    current_voice_id: Some(Some("ember".to_string())),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(updated.current_voice_id.as_deref(), Some("ember"));
        assert_eq!(updated.name, "Maya");

        // Clearing an optional field.
        let cleared = users
            .update(
                &user.id,
                UserPatch {
                    current_voice_id: Some(None),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        assert!(cleared.current_voice_id.is_none());
    }

    #[test]
    fn test_update_missing_user() {
        let users = store();
        assert!(users.update("nope", UserPatch::default()).unwrap().is_none());
    }

    #[test]
    fn test_preferences_roundtrip() {
        let users = store();
        let user = users.create("Sam", None, "", None).unwrap();
        let mut prefs = users.preferences(&user);
        assert!(prefs.use_default_voice_everywhere);

        prefs.default_voice_id = Some("ember".to_string());
        prefs.use_default_voice_everywhere = false;
        let user = users.save_preferences(&user.id, &prefs).unwrap().unwrap();
        let parsed = users.preferences(&user);
        assert_eq!(parsed.default_voice_id.as_deref(), Some("ember"));
        assert!(!parsed.use_default_voice_everywhere);
    }
}
