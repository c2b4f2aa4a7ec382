//! Installed content packs: bundles of experiences and voices that can
//! be enabled, disabled or uninstalled as a unit.

use crate::db::{now_ts, Db};
use crate::models::Pack;
use crate::Result;
use rusqlite::OptionalExtension;
use serde::Deserialize;

/// Pack manifest as shipped inside a pack bundle.
#[derive(Debug, Clone, Deserialize)]
pub struct PackManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

pub trait PackStore {
    fn list(&self) -> Result<Vec<Pack>>;
    fn get(&self, id: &str) -> Result<Option<Pack>>;
    /// Register a pack; reinstalling bumps version metadata in place.
    fn install(&self, manifest: &PackManifest) -> Result<Pack>;
    fn set_enabled(&self, id: &str, enabled: bool) -> Result<Option<Pack>>;
    /// Remove a pack and every experience/voice it owns.
    fn uninstall(&self, id: &str) -> Result<bool>;
    /// Attach an owned record to the pack.
    fn claim_experience(&self, pack_id: &str, experience_id: &str) -> Result<()>;
    fn claim_voice(&self, pack_id: &str, voice_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct SqlitePacks {
    db: Db,
}

impl SqlitePacks {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn row_to_pack(row: &rusqlite::Row<'_>) -> rusqlite::Result<Pack> {
    Ok(Pack {
        id: row.get("id")?,
        name: row.get("name")?,
        version: row.get("version")?,
        author: row.get("author")?,
        description: row.get("description")?,
        installed_at: row.get("installed_at")?,
        is_enabled: row.get("is_enabled")?,
    })
}

impl PackStore for SqlitePacks {
    fn list(&self) -> Result<Vec<Pack>> {
        self.db.with(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM packs ORDER BY installed_at DESC, rowid DESC")?;
            let rows = stmt.query_map([], row_to_pack)?;
            rows.collect()
        })
    }

    fn get(&self, id: &str) -> Result<Option<Pack>> {
        self.db.with(|conn| {
            conn.query_row("SELECT * FROM packs WHERE id = ?1", [id], row_to_pack)
                .optional()
        })
    }

    fn install(&self, manifest: &PackManifest) -> Result<Pack> {
        let installed_at = now_ts();
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO packs (id, name, version, author, description, installed_at, is_enabled)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)
                 ON CONFLICT(id) DO UPDATE SET
                   name = excluded.name,
                   version = excluded.version,
                   author = excluded.author,
                   description = excluded.description",
                rusqlite::params![
                    manifest.id,
                    manifest.name,
                    manifest.version,
                    manifest.author,
                    manifest.description,
                    installed_at
                ],
            )
        })?;
        Ok(self.get(&manifest.id)?.expect("pack just installed"))
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<Option<Pack>> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE packs SET is_enabled = ?1 WHERE id = ?2",
                rusqlite::params![enabled, id],
            )
        })?;
        self.get(id)
    }

    fn uninstall(&self, id: &str) -> Result<bool> {
        self.db.with(|conn| {
            conn.execute("DELETE FROM experiences WHERE pack_id = ?1", [id])?;
            conn.execute("DELETE FROM voices WHERE pack_id = ?1", [id])?;
            let n = conn.execute("DELETE FROM packs WHERE id = ?1", [id])?;
            Ok(n > 0)
        })
    }

    fn claim_experience(&self, pack_id: &str, experience_id: &str) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE experiences SET pack_id = ?1 WHERE id = ?2",
                rusqlite::params![pack_id, experience_id],
            )
        })?;
        Ok(())
    }

    fn claim_voice(&self, pack_id: &str, voice_id: &str) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "UPDATE voices SET pack_id = ?1 WHERE voice_id = ?2",
                rusqlite::params![pack_id, voice_id],
            )
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiences::{ExperienceStore, NewExperience, SqliteExperiences};
    use crate::models::ExperienceKind;

    fn manifest(id: &str) -> PackManifest {
        PackManifest {
            id: id.to_string(),
            name: "Bedtime".to_string(),
            version: "1.0.0".to_string(),
            author: None,
            description: None,
        }
    }

    #[test]
    fn test_install_enable_disable() {
        let packs = SqlitePacks::new(Db::open(":memory:").unwrap());
        let pack = packs.install(&manifest("bedtime")).unwrap();
        assert!(pack.is_enabled);

        let pack = packs.set_enabled("bedtime", false).unwrap().unwrap();
        assert!(!pack.is_enabled);
        assert!(packs.set_enabled("missing", true).unwrap().is_none());
    }

    #[test]
    fn test_uninstall_removes_owned_records() {
        let db = Db::open(":memory:").unwrap();
        let packs = SqlitePacks::new(db.clone());
        let experiences = SqliteExperiences::new(db);

        packs.install(&manifest("bedtime")).unwrap();
        let exp = experiences
            .create(NewExperience {
                name: "Sleepy Tales".to_string(),
                prompt: "You tell bedtime stories.".to_string(),
                short_description: String::new(),
                tags: vec![],
                voice_id: "ember".to_string(),
                kind: ExperienceKind::Story,
                is_global: false,
                img_src: None,
            })
            .unwrap();
        packs.claim_experience("bedtime", &exp.id).unwrap();

        assert!(packs.uninstall("bedtime").unwrap());
        assert!(experiences.get(&exp.id).unwrap().is_none());
        assert!(!packs.uninstall("bedtime").unwrap());
    }
}
