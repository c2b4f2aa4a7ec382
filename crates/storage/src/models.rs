//! Persisted record types.

use serde::{Deserialize, Serialize};

/// Experience kind: a plain chat persona, an interactive game host, or a
/// storyteller. Drives prompt construction and greeting behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExperienceKind {
    Personality,
    Game,
    Story,
}

impl ExperienceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceKind::Personality => "personality",
            ExperienceKind::Game => "game",
            ExperienceKind::Story => "story",
        }
    }

    /// Unknown kinds fall back to `Personality`.
    pub fn parse(s: &str) -> Self {
        match s {
            "game" => ExperienceKind::Game,
            "story" => ExperienceKind::Story,
            _ => ExperienceKind::Personality,
        }
    }
}

/// A persona/game/story descriptor. Immutable for the duration of a
/// session once resolved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    pub id: String,
    pub name: String,
    pub prompt: String,
    pub short_description: String,
    pub tags: Vec<String>,
    pub is_visible: bool,
    pub is_global: bool,
    pub voice_id: String,
    pub kind: ExperienceKind,
    pub img_src: Option<String>,
    pub pack_id: Option<String>,
    pub created_at: Option<f64>,
}

/// A synthesizable voice. `voice_id` doubles as the reference audio file
/// stem under the voices directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Voice {
    pub voice_id: String,
    pub gender: Option<String>,
    pub voice_name: String,
    pub voice_description: Option<String>,
    pub is_global: bool,
    pub pack_id: Option<String>,
    pub created_at: Option<f64>,
}

/// A household member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub age: Option<i64>,
    pub about_you: String,
    pub user_type: String,
    pub avatar_emoji: Option<String>,
    pub current_personality_id: Option<String>,
    pub current_voice_id: Option<String>,
    pub settings_json: Option<String>,
}

/// A named (voice, personality) pair a user can select as a unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProfileEntry {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub personality_id: Option<String>,
}

/// Per-user preferences stored as a JSON blob on the user record.
/// Parsed leniently: malformed blobs yield defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub default_voice_id: Option<String>,
    pub default_personality_id: Option<String>,
    pub default_profile_id: Option<String>,
    pub profiles: Vec<ProfileEntry>,
    pub use_default_voice_everywhere: bool,
    pub allow_experience_voice_override: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            default_voice_id: None,
            default_personality_id: None,
            default_profile_id: None,
            profiles: Vec::new(),
            use_default_voice_everywhere: true,
            allow_experience_voice_override: false,
        }
    }
}

impl Preferences {
    /// Parse a raw `settings_json` blob with safe defaults.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            Some(s) if !s.trim().is_empty() => serde_json::from_str(s).unwrap_or_default(),
            _ => Self::default(),
        }
    }

    pub fn profile(&self, id: &str) -> Option<&ProfileEntry> {
        self.profiles.iter().find(|p| p.id == id)
    }
}

/// A persisted voice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub started_at: f64,
    pub ended_at: Option<f64>,
    pub duration_sec: Option<f64>,
    pub client_kind: String,
    pub user_id: Option<String>,
    pub personality_id: Option<String>,
}

/// One side of a turn in the conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub id: String,
    pub role: String,
    pub transcript: String,
    pub timestamp: f64,
    pub session_id: Option<String>,
}

/// An installed content pack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pack {
    pub id: String,
    pub name: String,
    pub version: String,
    pub author: Option<String>,
    pub description: Option<String>,
    pub installed_at: f64,
    pub is_enabled: bool,
}

/// Embedded-device status, kept as a JSON blob in the settings KV.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceStatus {
    pub mac_address: Option<String>,
    pub volume: Option<i64>,
    pub flashed: Option<bool>,
    pub ws_status: String,
    pub ws_last_seen: Option<f64>,
    pub firmware_version: Option<String>,
    pub session_id: Option<String>,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            mac_address: None,
            volume: None,
            flashed: None,
            ws_status: "disconnected".to_string(),
            ws_last_seen: None,
            firmware_version: None,
            session_id: None,
        }
    }
}

/// Patch applied to the device status blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevicePatch {
    pub mac_address: Option<String>,
    pub volume: Option<i64>,
    pub flashed: Option<bool>,
    pub ws_status: Option<String>,
    pub ws_last_seen: Option<f64>,
    pub firmware_version: Option<String>,
    /// `Some(None)` clears the session id.
    #[serde(default, with = "double_option")]
    pub session_id: Option<Option<String>>,
}

/// Serde helper distinguishing "absent" from "explicitly null".
mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<T, S>(value: &Option<Option<T>>, ser: S) -> Result<S::Ok, S::Error>
    where
        T: Serialize,
        S: Serializer,
    {
        match value {
            Some(inner) => inner.serialize(ser),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, T, D>(de: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(de).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferences_lenient_parse() {
        let prefs = Preferences::parse(Some("not json"));
        assert!(prefs.use_default_voice_everywhere);
        assert!(prefs.profiles.is_empty());

        let prefs = Preferences::parse(Some(
            r#"{"default_voice_id":"ember","profiles":[{"id":"p1","name":"Night"}]}"#,
        ));
        assert_eq!(prefs.default_voice_id.as_deref(), Some("ember"));
        assert!(prefs.profile("p1").is_some());
        assert!(prefs.profile("p2").is_none());
    }

    #[test]
    fn test_experience_kind_parse() {
        assert_eq!(ExperienceKind::parse("game"), ExperienceKind::Game);
        assert_eq!(ExperienceKind::parse("story"), ExperienceKind::Story);
        assert_eq!(
            ExperienceKind::parse("anything-else"),
            ExperienceKind::Personality
        );
    }

    #[test]
    fn test_device_status_default() {
        let status = DeviceStatus::default();
        assert_eq!(status.ws_status, "disconnected");
        assert!(status.session_id.is_none());
    }
}
