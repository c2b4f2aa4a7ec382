//! Voice-reference resolution.
//!
//! Runs fresh on every synthesis call because the per-user override can
//! change mid-session. Precedence: explicit per-user override → session
//! voice (set by a config message) → default-profile voice → preference
//! rules → the experience's declared voice → global fallback → literal
//! default id.

use hearth_storage::{Experience, Preferences, Storage, UserRecord, VoiceStore};
use std::path::PathBuf;
use std::sync::Arc;

/// Last-resort voice id when nothing is registered at all.
pub const DEFAULT_VOICE_ID: &str = "ember";

/// Preference-level resolution, shared by session resolution and the
/// HTTP surface.
///
/// - default voice + "use everywhere" wins;
/// - otherwise an experience voice wins when overrides are allowed;
/// - otherwise the default voice, the experience voice, the supplied
///   fallback, then the literal default.
pub fn resolve_voice_id(
    prefs: &Preferences,
    experience_voice: Option<&str>,
    fallback: Option<&str>,
) -> String {
    let default_voice = prefs.default_voice_id.as_deref().filter(|v| !v.is_empty());
    if let Some(voice) = default_voice {
        if prefs.use_default_voice_everywhere {
            return voice.to_string();
        }
    }
    if prefs.allow_experience_voice_override {
        if let Some(voice) = experience_voice.filter(|v| !v.is_empty()) {
            return voice.to_string();
        }
    }
    if let Some(voice) = default_voice {
        return voice.to_string();
    }
    experience_voice
        .filter(|v| !v.is_empty())
        .or(fallback.filter(|v| !v.is_empty()))
        .unwrap_or(DEFAULT_VOICE_ID)
        .trim()
        .to_string()
}

/// Session-scope resolver with access to the store and the reference
/// audio directory.
#[derive(Clone)]
pub struct VoiceResolver {
    storage: Arc<Storage>,
    voices_dir: Option<PathBuf>,
}

impl VoiceResolver {
    pub fn new(storage: Arc<Storage>, voices_dir: Option<PathBuf>) -> Self {
        Self {
            storage,
            voices_dir,
        }
    }

    fn voice_exists(&self, voice_id: &str) -> bool {
        self.storage.voices.exists(voice_id).unwrap_or(false)
    }

    /// Resolve the voice id for the next synthesis call.
    pub fn resolve_for_session(
        &self,
        user: Option<&UserRecord>,
        session_voice: Option<&str>,
        experience: Option<&Experience>,
    ) -> String {
        // Explicit per-user override.
        if let Some(voice) = user.and_then(|u| u.current_voice_id.as_deref()) {
            if self.voice_exists(voice) {
                return voice.to_string();
            }
        }

        // Session-level override from a config message.
        if let Some(voice) = session_voice.filter(|v| !v.is_empty()) {
            if self.voice_exists(voice) {
                return voice.to_string();
            }
        }

        let prefs = user
            .map(|u| Preferences::parse(u.settings_json.as_deref()))
            .unwrap_or_default();

        // Default profile's voice.
        if let Some(profile_id) = prefs.default_profile_id.as_deref() {
            if let Some(voice) = prefs.profile(profile_id).and_then(|p| p.voice_id.as_deref()) {
                if self.voice_exists(voice) {
                    return voice.to_string();
                }
            }
        }

        let fallback = self.storage.voices.default_voice_id().unwrap_or(None);
        resolve_voice_id(
            &prefs,
            experience.map(|e| e.voice_id.as_str()),
            fallback.as_deref(),
        )
    }

    /// Path to the local reference WAV for a voice, if present on disk.
    pub fn reference_path(&self, voice_id: &str) -> Option<PathBuf> {
        if voice_id.is_empty() {
            return None;
        }
        let dir = self.voices_dir.as_ref()?;
        let path = dir.join(format!("{voice_id}.wav"));
        path.is_file().then_some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_storage::{ProfileEntry, UserPatch, UserStore};

    fn prefs() -> Preferences {
        Preferences::default()
    }

    #[test]
    fn test_default_voice_everywhere_wins() {
        let mut p = prefs();
        p.default_voice_id = Some("calm".to_string());
        assert_eq!(resolve_voice_id(&p, Some("story-voice"), None), "calm");
    }

    #[test]
    fn test_experience_override_when_allowed() {
        let mut p = prefs();
        p.default_voice_id = Some("calm".to_string());
        p.use_default_voice_everywhere = false;
        p.allow_experience_voice_override = true;
        assert_eq!(resolve_voice_id(&p, Some("story-voice"), None), "story-voice");
        // Without an experience voice the default still applies.
        assert_eq!(resolve_voice_id(&p, None, None), "calm");
    }

    #[test]
    fn test_fallback_chain_ends_in_literal_default() {
        let p = prefs();
        assert_eq!(resolve_voice_id(&p, None, Some("oldest")), "oldest");
        assert_eq!(resolve_voice_id(&p, None, None), DEFAULT_VOICE_ID);
    }

    fn resolver_with_voices(ids: &[&str]) -> (VoiceResolver, Arc<Storage>) {
        let storage = Arc::new(Storage::in_memory().unwrap());
        for id in ids {
            storage.voices.upsert(id, id, None, None, true).unwrap();
        }
        (VoiceResolver::new(storage.clone(), None), storage)
    }

    #[test]
    fn test_user_override_beats_session_voice() {
        let (resolver, storage) = resolver_with_voices(&["mine", "session"]);
        let user = storage.users.create("A", None, "", None).unwrap();
        let user = storage
            .users
            .update(
                &user.id,
                UserPatch {
                    current_voice_id: Some(Some("mine".to_string())),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        let resolved = resolver.resolve_for_session(Some(&user), Some("session"), None);
        assert_eq!(resolved, "mine");
    }

    #[test]
    fn test_missing_user_voice_falls_through_to_session() {
        let (resolver, storage) = resolver_with_voices(&["session"]);
        let user = storage.users.create("A", None, "", None).unwrap();
        let user = storage
            .users
            .update(
                &user.id,
                UserPatch {
                    current_voice_id: Some(Some("not-registered".to_string())),
                    ..Default::default()
                },
            )
            .unwrap()
            .unwrap();
        let resolved = resolver.resolve_for_session(Some(&user), Some("session"), None);
        assert_eq!(resolved, "session");
    }

    #[test]
    fn test_default_profile_voice_used() {
        let (resolver, storage) = resolver_with_voices(&["night"]);
        let user = storage.users.create("A", None, "", None).unwrap();
        let mut p = prefs();
        p.default_profile_id = Some("p1".to_string());
        p.profiles.push(ProfileEntry {
            id: "p1".to_string(),
            name: "Night".to_string(),
            voice_id: Some("night".to_string()),
            personality_id: None,
        });
        let user = storage.users.save_preferences(&user.id, &p).unwrap().unwrap();
        let resolved = resolver.resolve_for_session(Some(&user), None, None);
        assert_eq!(resolved, "night");
    }

    #[test]
    fn test_no_user_falls_back_to_oldest_voice() {
        let (resolver, _storage) = resolver_with_voices(&["first", "second"]);
        let resolved = resolver.resolve_for_session(None, None, None);
        assert_eq!(resolved, "first");
    }

    #[test]
    fn test_reference_path_requires_existing_file() {
        let (resolver, _storage) = resolver_with_voices(&[]);
        assert!(resolver.reference_path("ember").is_none());
    }
}
