//! Experience records: personalities, games and stories.

use crate::db::{now_ts, Db};
use crate::models::{Experience, ExperienceKind};
use crate::{Result, StorageError};
use rusqlite::OptionalExtension;
use uuid::Uuid;

/// Creation request.
#[derive(Debug, Clone)]
pub struct NewExperience {
    pub name: String,
    pub prompt: String,
    pub short_description: String,
    pub tags: Vec<String>,
    pub voice_id: String,
    pub kind: ExperienceKind,
    pub is_global: bool,
    pub img_src: Option<String>,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct ExperiencePatch {
    pub name: Option<String>,
    pub prompt: Option<String>,
    pub short_description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub voice_id: Option<String>,
    pub is_visible: Option<bool>,
    pub img_src: Option<String>,
}

pub trait ExperienceStore {
    fn list(&self, include_hidden: bool, kind: Option<ExperienceKind>) -> Result<Vec<Experience>>;
    fn get(&self, id: &str) -> Result<Option<Experience>>;
    fn create(&self, new: NewExperience) -> Result<Experience>;
    fn update(&self, id: &str, patch: ExperiencePatch) -> Result<Option<Experience>>;
    /// Global experiences cannot be deleted.
    fn delete(&self, id: &str) -> Result<bool>;
}

#[derive(Clone)]
pub struct SqliteExperiences {
    db: Db,
}

impl SqliteExperiences {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Deterministic fallback persona: first visible personality under
    /// the store's listing order (newest first, stable tiebreak).
    pub fn first_visible_personality(&self) -> Result<Option<Experience>> {
        Ok(self
            .list(false, Some(ExperienceKind::Personality))?
            .into_iter()
            .next())
    }
}

fn row_to_experience(row: &rusqlite::Row<'_>) -> rusqlite::Result<Experience> {
    let tags_raw: Option<String> = row.get("tags")?;
    let kind_raw: String = row.get("kind")?;
    Ok(Experience {
        id: row.get("id")?,
        name: row.get("name")?,
        prompt: row.get("prompt")?,
        short_description: row.get::<_, Option<String>>("short_description")?.unwrap_or_default(),
        tags: tags_raw
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default(),
        is_visible: row.get("is_visible")?,
        is_global: row.get("is_global")?,
        voice_id: row.get("voice_id")?,
        kind: ExperienceKind::parse(&kind_raw),
        img_src: row.get("img_src")?,
        pack_id: row.get("pack_id")?,
        created_at: row.get("created_at")?,
    })
}

impl ExperienceStore for SqliteExperiences {
    fn list(&self, include_hidden: bool, kind: Option<ExperienceKind>) -> Result<Vec<Experience>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM experiences
                 WHERE (?1 IS NULL OR kind = ?1) AND (?2 OR is_visible = 1)
                 ORDER BY created_at DESC, rowid DESC",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![kind.map(|k| k.as_str()), include_hidden],
                row_to_experience,
            )?;
            rows.collect()
        })
    }

    fn get(&self, id: &str) -> Result<Option<Experience>> {
        self.db.with(|conn| {
            conn.query_row(
                "SELECT * FROM experiences WHERE id = ?1",
                [id],
                row_to_experience,
            )
            .optional()
        })
    }

    fn create(&self, new: NewExperience) -> Result<Experience> {
        let id = Uuid::new_v4().to_string();
        let created_at = now_ts();
        let tags = serde_json::to_string(&new.tags)?;
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO experiences
                   (id, name, prompt, short_description, tags, is_visible, is_global,
                    voice_id, kind, img_src, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    id,
                    new.name,
                    new.prompt,
                    new.short_description,
                    tags,
                    new.is_global,
                    new.voice_id,
                    new.kind.as_str(),
                    new.img_src,
                    created_at
                ],
            )
        })?;
        self.get(&id)?
            .ok_or_else(|| StorageError::NotFound(format!("experience {id}")))
    }

    fn update(&self, id: &str, patch: ExperiencePatch) -> Result<Option<Experience>> {
        let Some(current) = self.get(id)? else {
            return Ok(None);
        };
        let tags = serde_json::to_string(&patch.tags.unwrap_or(current.tags))?;
        self.db.with(|conn| {
            conn.execute(
                "UPDATE experiences SET
                   name = ?1, prompt = ?2, short_description = ?3, tags = ?4,
                   voice_id = ?5, is_visible = ?6, img_src = ?7
                 WHERE id = ?8",
                rusqlite::params![
                    patch.name.unwrap_or(current.name),
                    patch.prompt.unwrap_or(current.prompt),
                    patch.short_description.unwrap_or(current.short_description),
                    tags,
                    patch.voice_id.unwrap_or(current.voice_id),
                    patch.is_visible.unwrap_or(current.is_visible),
                    patch.img_src.or(current.img_src),
                    id
                ],
            )
        })?;
        self.get(id)
    }

    fn delete(&self, id: &str) -> Result<bool> {
        let n = self.db.with(|conn| {
            conn.execute(
                "DELETE FROM experiences WHERE id = ?1 AND is_global = 0",
                [id],
            )
        })?;
        Ok(n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteExperiences {
        SqliteExperiences::new(Db::open(":memory:").unwrap())
    }

    fn sample(name: &str, kind: ExperienceKind) -> NewExperience {
        NewExperience {
            name: name.to_string(),
            prompt: format!("You are {name}."),
            short_description: String::new(),
            tags: vec![],
            voice_id: "ember".to_string(),
            kind,
            is_global: false,
            img_src: None,
        }
    }

    #[test]
    fn test_create_and_list_by_kind() {
        let experiences = store();
        experiences.create(sample("Chat", ExperienceKind::Personality)).unwrap();
        experiences.create(sample("Riddles", ExperienceKind::Game)).unwrap();

        let personalities = experiences
            .list(false, Some(ExperienceKind::Personality))
            .unwrap();
        assert_eq!(personalities.len(), 1);
        assert_eq!(personalities[0].name, "Chat");
        assert_eq!(experiences.list(false, None).unwrap().len(), 2);
    }

    #[test]
    fn test_first_visible_personality_is_newest() {
        let experiences = store();
        experiences.create(sample("Old", ExperienceKind::Personality)).unwrap();
        experiences.create(sample("New", ExperienceKind::Personality)).unwrap();
        // Same-timestamp creations fall back to rowid, newest first.
        let first = experiences.first_visible_personality().unwrap().unwrap();
        assert_eq!(first.name, "New");
    }

    #[test]
    fn test_hidden_excluded_from_fallback() {
        let experiences = store();
        let exp = experiences.create(sample("Hidden", ExperienceKind::Personality)).unwrap();
        experiences
            .update(
                &exp.id,
                ExperiencePatch {
                    is_visible: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(experiences.first_visible_personality().unwrap().is_none());
    }

    #[test]
    fn test_global_experiences_cannot_be_deleted() {
        let experiences = store();
        let mut new = sample("Core", ExperienceKind::Personality);
        new.is_global = true;
        let exp = experiences.create(new).unwrap();
        assert!(!experiences.delete(&exp.id).unwrap());
        assert!(experiences.get(&exp.id).unwrap().is_some());
    }
}
