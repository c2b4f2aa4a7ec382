//! Key/value application settings, including the active-user pointer and
//! the embedded-device status blob.

use crate::db::{now_ts, Db};
use crate::models::{DevicePatch, DeviceStatus};
use crate::Result;
use rusqlite::OptionalExtension;
use std::collections::HashMap;

pub trait SettingsStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: Option<&str>) -> Result<()>;
    fn delete(&self, key: &str) -> Result<bool>;
    fn all(&self) -> Result<HashMap<String, Option<String>>>;
}

#[derive(Clone)]
pub struct SqliteSettings {
    db: Db,
}

impl SqliteSettings {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn active_user_id(&self) -> Result<Option<String>> {
        Ok(self.get("active_user_id")?.filter(|v| !v.is_empty()))
    }

    pub fn set_active_user_id(&self, user_id: Option<&str>) -> Result<()> {
        self.set("active_user_id", user_id)
    }

    pub fn device_status(&self) -> Result<DeviceStatus> {
        let status = self
            .get("device_status")?
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Ok(status)
    }

    pub fn update_device(&self, patch: DevicePatch) -> Result<DeviceStatus> {
        let mut status = self.device_status()?;
        if let Some(mac) = patch.mac_address {
            status.mac_address = Some(mac);
        }
        if let Some(volume) = patch.volume {
            status.volume = Some(volume);
        }
        if let Some(flashed) = patch.flashed {
            status.flashed = Some(flashed);
        }
        if let Some(ws_status) = patch.ws_status {
            status.ws_status = ws_status;
        }
        if let Some(seen) = patch.ws_last_seen {
            status.ws_last_seen = Some(seen);
        }
        if let Some(version) = patch.firmware_version {
            status.firmware_version = Some(version);
        }
        if let Some(session_id) = patch.session_id {
            status.session_id = session_id;
        }
        if status.ws_last_seen.is_none() {
            status.ws_last_seen = Some(now_ts());
        }
        let raw = serde_json::to_string(&status)?;
        self.set("device_status", Some(&raw))?;
        Ok(status)
    }
}

impl SettingsStore for SqliteSettings {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.db.with(|conn| {
            conn.query_row(
                "SELECT value FROM app_state WHERE key = ?1",
                [key],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()
        })?;
        Ok(value.flatten())
    }

    fn set(&self, key: &str, value: Option<&str>) -> Result<()> {
        self.db.with(|conn| {
            conn.execute(
                "INSERT INTO app_state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                rusqlite::params![key, value],
            )
        })?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let n = self
            .db
            .with(|conn| conn.execute("DELETE FROM app_state WHERE key = ?1", [key]))?;
        Ok(n > 0)
    }

    fn all(&self) -> Result<HashMap<String, Option<String>>> {
        self.db.with(|conn| {
            let mut stmt = conn.prepare("SELECT key, value FROM app_state")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteSettings {
        SqliteSettings::new(Db::open(":memory:").unwrap())
    }

    #[test]
    fn test_set_get_delete() {
        let settings = store();
        assert!(settings.get("tts_backend").unwrap().is_none());
        settings.set("tts_backend", Some("voicebox")).unwrap();
        assert_eq!(
            settings.get("tts_backend").unwrap().as_deref(),
            Some("voicebox")
        );
        assert!(settings.delete("tts_backend").unwrap());
        assert!(!settings.delete("tts_backend").unwrap());
    }

    #[test]
    fn test_active_user_roundtrip() {
        let settings = store();
        assert!(settings.active_user_id().unwrap().is_none());
        settings.set_active_user_id(Some("u1")).unwrap();
        assert_eq!(settings.active_user_id().unwrap().as_deref(), Some("u1"));
    }

    #[test]
    fn test_device_patch_merges() {
        let settings = store();
        let status = settings
            .update_device(DevicePatch {
                ws_status: Some("connected".to_string()),
                session_id: Some(Some("s1".to_string())),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(status.ws_status, "connected");
        assert_eq!(status.session_id.as_deref(), Some("s1"));

        let status = settings
            .update_device(DevicePatch {
                session_id: Some(None),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(status.ws_status, "connected");
        assert!(status.session_id.is_none());
    }
}
