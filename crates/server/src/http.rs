//! HTTP surface: settings, users, experiences, voices, conversation and
//! session listings, device state and events, model management, packs.
//!
//! Thin request/response glue over the store and the facade; the
//! session protocol lives in [`crate::ws`].

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use hearth_storage::{
    ConversationLog, DevicePatch, Experience, ExperienceKind, ExperiencePatch, ExperienceStore,
    NewExperience, PackManifest, PackStore, Preferences, ProfileEntry, SessionStore, SettingsStore,
    UserPatch, UserStore, VoiceStore,
};

use crate::state::AppState;
use crate::ws::ws_handler;
use crate::ApiError;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/startup-status", get(startup_status))
        .route("/settings", get(all_settings))
        .route("/settings/:key", get(get_setting).put(set_setting).delete(delete_setting))
        .route("/active-user", get(active_user).put(set_active_user))
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", put(update_user))
        .route("/users/me/preferences", get(my_preferences).post(set_my_preferences))
        .route("/users/me/profiles", get(my_profiles).post(create_profile))
        .route("/users/me/profiles/:id", put(update_profile).delete(delete_profile))
        .route("/experiences", get(list_experiences).post(create_experience))
        .route("/experiences/:id", put(update_experience).delete(delete_experience))
        .route("/voices", get(list_voices).post(create_voice))
        .route("/conversations", get(list_conversations))
        .route("/sessions", get(list_sessions))
        .route("/sessions/active", get(active_session))
        .route("/sessions/active/personality", post(set_active_personality))
        .route("/sessions/active/voice", post(set_active_voice))
        .route("/sessions/active/profile", post(set_active_profile))
        .route("/sessions/active/reset", post(reset_active))
        .route("/device", get(device_status).put(patch_device))
        .route("/device/disconnect", post(disconnect_device))
        .route("/events/device", get(device_events))
        .route("/models", get(models_info))
        .route("/models/switch", post(switch_model))
        .route("/packs", get(list_packs))
        .route("/packs/install", post(install_pack))
        .route("/packs/:id/enabled", post(set_pack_enabled))
        .route("/packs/:id", delete(uninstall_pack))
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http());

    if state.settings.server.cors_enabled {
        router = router.layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );
    }

    router.with_state(state)
}

// --- Health / readiness ---

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Serialize)]
struct StartupStatus {
    ready: bool,
    seeded: bool,
    engines_ready: bool,
}

async fn startup_status(State(state): State<AppState>) -> Json<StartupStatus> {
    let seeded = state.storage.is_seeded();
    let engines_ready = state.facade.is_ready();
    Json(StartupStatus {
        ready: seeded && engines_ready,
        seeded,
        engines_ready,
    })
}

// --- Settings ---

async fn all_settings(
    State(state): State<AppState>,
) -> ApiResult<std::collections::HashMap<String, Option<String>>> {
    Ok(Json(state.storage.settings.all()?))
}

#[derive(Serialize)]
struct SettingValue {
    key: String,
    value: Option<String>,
}

async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<SettingValue> {
    let value = state.storage.settings.get(&key)?;
    Ok(Json(SettingValue { key, value }))
}

#[derive(Deserialize)]
struct SettingUpdate {
    value: Option<String>,
}

async fn set_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(body): Json<SettingUpdate>,
) -> ApiResult<SettingValue> {
    state.storage.settings.set(&key, body.value.as_deref())?;
    Ok(Json(SettingValue {
        key,
        value: body.value,
    }))
}

#[derive(Serialize)]
struct Deleted {
    deleted: bool,
}

async fn delete_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Deleted> {
    Ok(Json(Deleted {
        deleted: state.storage.settings.delete(&key)?,
    }))
}

// --- Active user ---

#[derive(Serialize)]
struct ActiveUser {
    user_id: Option<String>,
    user: Option<UserSummary>,
}

#[derive(Serialize)]
struct UserSummary {
    id: String,
    name: String,
    current_personality_id: Option<String>,
    current_voice_id: Option<String>,
}

fn active_user_response(state: &AppState) -> Result<ActiveUser, ApiError> {
    let user_id = state.storage.settings.active_user_id()?;
    let user = user_id
        .as_deref()
        .and_then(|id| state.storage.users.get(id).ok().flatten())
        .map(|u| UserSummary {
            id: u.id,
            name: u.name,
            current_personality_id: u.current_personality_id,
            current_voice_id: u.current_voice_id,
        });
    Ok(ActiveUser { user_id, user })
}

async fn active_user(State(state): State<AppState>) -> ApiResult<ActiveUser> {
    Ok(Json(active_user_response(&state)?))
}

#[derive(Deserialize)]
struct ActiveUserUpdate {
    user_id: Option<String>,
}

async fn set_active_user(
    State(state): State<AppState>,
    Json(body): Json<ActiveUserUpdate>,
) -> ApiResult<ActiveUser> {
    state
        .storage
        .settings
        .set_active_user_id(body.user_id.as_deref())?;
    Ok(Json(active_user_response(&state)?))
}

// --- Users ---

async fn list_users(State(state): State<AppState>) -> ApiResult<Vec<hearth_storage::UserRecord>> {
    Ok(Json(state.storage.users.list()?))
}

#[derive(Deserialize)]
struct UserCreate {
    name: String,
    #[serde(default)]
    age: Option<i64>,
    #[serde(default)]
    about_you: Option<String>,
    #[serde(default)]
    avatar_emoji: Option<String>,
}

async fn create_user(
    State(state): State<AppState>,
    Json(body): Json<UserCreate>,
) -> ApiResult<hearth_storage::UserRecord> {
    let user = state.storage.users.create(
        &body.name,
        body.age,
        body.about_you.as_deref().unwrap_or(""),
        body.avatar_emoji.as_deref(),
    )?;
    Ok(Json(user))
}

#[derive(Deserialize)]
struct UserUpdate {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    age: Option<i64>,
    #[serde(default)]
    about_you: Option<String>,
    #[serde(default)]
    user_type: Option<String>,
    #[serde(default)]
    avatar_emoji: Option<String>,
}

async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<UserUpdate>,
) -> ApiResult<hearth_storage::UserRecord> {
    let patch = UserPatch {
        name: body.name,
        age: body.age.map(Some),
        about_you: body.about_you,
        user_type: body.user_type,
        avatar_emoji: body.avatar_emoji.map(Some),
        ..Default::default()
    };
    state
        .storage
        .users
        .update(&id, patch)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("user {id}")))
}

// --- Preferences & profiles ---

fn active_user_record(state: &AppState) -> Result<hearth_storage::UserRecord, ApiError> {
    let user_id = state
        .storage
        .settings
        .active_user_id()?
        .ok_or_else(|| ApiError::InvalidRequest("No active user".to_string()))?;
    state
        .storage
        .users
        .get(&user_id)?
        .ok_or_else(|| ApiError::NotFound(format!("user {user_id}")))
}

async fn my_preferences(State(state): State<AppState>) -> ApiResult<Preferences> {
    let user = active_user_record(&state)?;
    Ok(Json(state.storage.users.preferences(&user)))
}

#[derive(Deserialize)]
struct PreferencesUpdate {
    #[serde(default)]
    default_voice_id: Option<String>,
    #[serde(default)]
    default_personality_id: Option<String>,
    #[serde(default)]
    default_profile_id: Option<String>,
    #[serde(default)]
    use_default_voice_everywhere: Option<bool>,
    #[serde(default)]
    allow_experience_voice_override: Option<bool>,
}

async fn set_my_preferences(
    State(state): State<AppState>,
    Json(body): Json<PreferencesUpdate>,
) -> ApiResult<Preferences> {
    let user = active_user_record(&state)?;
    let mut prefs = state.storage.users.preferences(&user);

    if let Some(voice_id) = body.default_voice_id {
        let voice_id = voice_id.trim().to_string();
        if voice_id.is_empty() {
            prefs.default_voice_id = None;
        } else {
            if !state.storage.voices.exists(&voice_id)? {
                return Err(ApiError::InvalidRequest(format!("Voice not found: {voice_id}")));
            }
            prefs.default_voice_id = Some(voice_id);
        }
    }
    if let Some(personality_id) = body.default_personality_id {
        let personality_id = personality_id.trim().to_string();
        if personality_id.is_empty() {
            prefs.default_personality_id = None;
        } else {
            require_personality(&state, &personality_id)?;
            prefs.default_personality_id = Some(personality_id);
        }
    }
    if let Some(profile_id) = body.default_profile_id {
        let profile_id = profile_id.trim().to_string();
        if profile_id.is_empty() {
            prefs.default_profile_id = None;
        } else {
            if prefs.profile(&profile_id).is_none() {
                return Err(ApiError::NotFound("profile".to_string()));
            }
            prefs.default_profile_id = Some(profile_id);
        }
    }
    if let Some(flag) = body.use_default_voice_everywhere {
        prefs.use_default_voice_everywhere = flag;
    }
    if let Some(flag) = body.allow_experience_voice_override {
        prefs.allow_experience_voice_override = flag;
    }

    state.storage.users.save_preferences(&user.id, &prefs)?;
    Ok(Json(prefs))
}

fn require_personality(state: &AppState, id: &str) -> Result<Experience, ApiError> {
    state
        .storage
        .experiences
        .get(id)?
        .filter(|e| e.kind == ExperienceKind::Personality)
        .ok_or_else(|| ApiError::InvalidRequest(format!("Personality not found: {id}")))
}

#[derive(Serialize)]
struct Profiles {
    profiles: Vec<ProfileEntry>,
}

async fn my_profiles(State(state): State<AppState>) -> ApiResult<Profiles> {
    let user = active_user_record(&state)?;
    Ok(Json(Profiles {
        profiles: state.storage.users.preferences(&user).profiles,
    }))
}

#[derive(Deserialize)]
struct ProfileCreate {
    name: String,
    voice_id: String,
    personality_id: String,
}

async fn create_profile(
    State(state): State<AppState>,
    Json(body): Json<ProfileCreate>,
) -> ApiResult<Profiles> {
    let user = active_user_record(&state)?;
    if !state.storage.voices.exists(body.voice_id.trim())? {
        return Err(ApiError::InvalidRequest("Voice not found".to_string()));
    }
    require_personality(&state, body.personality_id.trim())?;

    let mut prefs = state.storage.users.preferences(&user);
    prefs.profiles.push(ProfileEntry {
        id: uuid::Uuid::new_v4().to_string(),
        name: body.name.trim().chars().take(80).collect(),
        voice_id: Some(body.voice_id.trim().to_string()),
        personality_id: Some(body.personality_id.trim().to_string()),
    });
    state.storage.users.save_preferences(&user.id, &prefs)?;
    Ok(Json(Profiles {
        profiles: prefs.profiles,
    }))
}

#[derive(Deserialize)]
struct ProfileUpdate {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    voice_id: Option<String>,
    #[serde(default)]
    personality_id: Option<String>,
}

async fn update_profile(
    State(state): State<AppState>,
    Path(profile_id): Path<String>,
    Json(body): Json<ProfileUpdate>,
) -> ApiResult<Profiles> {
    let user = active_user_record(&state)?;
    let mut prefs = state.storage.users.preferences(&user);

    if let Some(voice_id) = body.voice_id.as_deref() {
        if !voice_id.trim().is_empty() && !state.storage.voices.exists(voice_id.trim())? {
            return Err(ApiError::InvalidRequest("Voice not found".to_string()));
        }
    }
    if let Some(personality_id) = body.personality_id.as_deref() {
        if !personality_id.trim().is_empty() {
            require_personality(&state, personality_id.trim())?;
        }
    }

    let entry = prefs
        .profiles
        .iter_mut()
        .find(|p| p.id == profile_id)
        .ok_or_else(|| ApiError::NotFound("profile".to_string()))?;
    if let Some(name) = body.name {
        let trimmed: String = name.trim().chars().take(80).collect();
        if !trimmed.is_empty() {
            entry.name = trimmed;
        }
    }
    if let Some(voice_id) = body.voice_id {
        if !voice_id.trim().is_empty() {
            entry.voice_id = Some(voice_id.trim().to_string());
        }
    }
    if let Some(personality_id) = body.personality_id {
        if !personality_id.trim().is_empty() {
            entry.personality_id = Some(personality_id.trim().to_string());
        }
    }

    state.storage.users.save_preferences(&user.id, &prefs)?;
    Ok(Json(Profiles {
        profiles: prefs.profiles,
    }))
}

async fn delete_profile(
    State(state): State<AppState>,
    Path(profile_id): Path<String>,
) -> ApiResult<Profiles> {
    let user = active_user_record(&state)?;
    let mut prefs = state.storage.users.preferences(&user);
    prefs.profiles.retain(|p| p.id != profile_id);
    if prefs.default_profile_id.as_deref() == Some(profile_id.as_str()) {
        prefs.default_profile_id = None;
    }
    state.storage.users.save_preferences(&user.id, &prefs)?;
    Ok(Json(Profiles {
        profiles: prefs.profiles,
    }))
}

// --- Experiences ---

#[derive(Deserialize)]
struct ExperienceQuery {
    #[serde(default)]
    include_hidden: bool,
    #[serde(default, rename = "type")]
    kind: Option<ExperienceKind>,
}

async fn list_experiences(
    State(state): State<AppState>,
    Query(query): Query<ExperienceQuery>,
) -> ApiResult<Vec<Experience>> {
    Ok(Json(
        state
            .storage
            .experiences
            .list(query.include_hidden, query.kind)?,
    ))
}

#[derive(Deserialize)]
struct ExperienceCreate {
    name: String,
    prompt: String,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    voice_id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<ExperienceKind>,
    #[serde(default)]
    img_src: Option<String>,
}

async fn create_experience(
    State(state): State<AppState>,
    Json(body): Json<ExperienceCreate>,
) -> ApiResult<Experience> {
    let voice_id = match body.voice_id.filter(|v| !v.trim().is_empty()) {
        Some(voice_id) if state.storage.voices.exists(voice_id.trim())? => {
            voice_id.trim().to_string()
        }
        _ => state
            .storage
            .voices
            .default_voice_id()?
            .ok_or_else(|| ApiError::InvalidRequest("No voices available".to_string()))?,
    };
    let experience = state.storage.experiences.create(NewExperience {
        name: body.name,
        prompt: body.prompt,
        short_description: body.short_description.unwrap_or_default(),
        tags: body.tags,
        voice_id,
        kind: body.kind.unwrap_or(ExperienceKind::Personality),
        is_global: false,
        img_src: body.img_src,
    })?;
    Ok(Json(experience))
}

async fn update_experience(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ExperiencePatch>,
) -> ApiResult<Experience> {
    state
        .storage
        .experiences
        .update(&id, patch)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("experience {id}")))
}

#[derive(Serialize)]
struct OkResponse {
    ok: bool,
}

async fn delete_experience(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<OkResponse> {
    if !state.storage.experiences.delete(&id)? {
        return Err(ApiError::NotFound(
            "Experience not found or not deletable".to_string(),
        ));
    }
    Ok(Json(OkResponse { ok: true }))
}

// --- Voices ---

async fn list_voices(State(state): State<AppState>) -> ApiResult<Vec<hearth_storage::Voice>> {
    Ok(Json(state.storage.voices.list(true)?))
}

#[derive(Deserialize)]
struct VoiceCreate {
    voice_id: String,
    voice_name: String,
    #[serde(default)]
    voice_description: Option<String>,
}

async fn create_voice(
    State(state): State<AppState>,
    Json(body): Json<VoiceCreate>,
) -> ApiResult<hearth_storage::Voice> {
    let voice = state.storage.voices.upsert(
        body.voice_id.trim(),
        body.voice_name.trim(),
        None,
        body.voice_description.as_deref(),
        false,
    )?;
    Ok(Json(voice))
}

// --- Conversations & sessions ---

#[derive(Deserialize)]
struct PageQuery {
    #[serde(default = "default_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
}

fn default_limit() -> i64 {
    50
}

async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<hearth_storage::ConversationEntry>> {
    let entries = match query.session_id.as_deref() {
        Some(session_id) => state.storage.conversations.history(session_id)?,
        None => state
            .storage
            .conversations
            .recent(query.limit, query.offset)?,
    };
    Ok(Json(entries))
}

async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Vec<hearth_storage::SessionRecord>> {
    Ok(Json(state.storage.sessions.list(
        query.limit,
        query.offset,
        query.user_id.as_deref(),
    )?))
}

// --- Active-session persona/voice selection ---

#[derive(Serialize)]
struct ActiveSession {
    active_personality_id: Option<String>,
    active_personality_name: Option<String>,
    active_voice_id: Option<String>,
    default_personality_id: Option<String>,
    default_profile_id: Option<String>,
    default_voice_id: Option<String>,
    profiles: Vec<ProfileEntry>,
}

fn active_session_response(state: &AppState) -> Result<ActiveSession, ApiError> {
    let user = state
        .storage
        .settings
        .active_user_id()?
        .and_then(|id| state.storage.users.get(&id).ok().flatten());
    let prefs = user
        .as_ref()
        .map(|u| state.storage.users.preferences(u))
        .unwrap_or_default();
    let active_personality_id = user.as_ref().and_then(|u| u.current_personality_id.clone());
    let active_personality_name = active_personality_id
        .as_deref()
        .and_then(|id| state.storage.experiences.get(id).ok().flatten())
        .map(|e| e.name);
    Ok(ActiveSession {
        active_personality_id,
        active_personality_name,
        active_voice_id: user.as_ref().and_then(|u| u.current_voice_id.clone()),
        default_personality_id: prefs.default_personality_id.clone(),
        default_profile_id: prefs.default_profile_id.clone(),
        default_voice_id: prefs.default_voice_id.clone(),
        profiles: prefs.profiles,
    })
}

async fn active_session(State(state): State<AppState>) -> ApiResult<ActiveSession> {
    Ok(Json(active_session_response(&state)?))
}

#[derive(Deserialize)]
struct PersonalitySelect {
    personality_id: String,
}

async fn set_active_personality(
    State(state): State<AppState>,
    Json(body): Json<PersonalitySelect>,
) -> ApiResult<ActiveSession> {
    let user = active_user_record(&state)?;
    let personality = require_personality(&state, body.personality_id.trim())?;
    state.storage.users.update(
        &user.id,
        UserPatch {
            current_personality_id: Some(Some(personality.id)),
            ..Default::default()
        },
    )?;
    Ok(Json(active_session_response(&state)?))
}

#[derive(Deserialize)]
struct VoiceSelect {
    voice_id: String,
}

async fn set_active_voice(
    State(state): State<AppState>,
    Json(body): Json<VoiceSelect>,
) -> ApiResult<ActiveSession> {
    let user = active_user_record(&state)?;
    let voice_id = body.voice_id.trim().to_string();
    if !state.storage.voices.exists(&voice_id)? {
        return Err(ApiError::InvalidRequest(format!("Voice not found: {voice_id}")));
    }
    state.storage.users.update(
        &user.id,
        UserPatch {
            current_voice_id: Some(Some(voice_id)),
            ..Default::default()
        },
    )?;
    Ok(Json(active_session_response(&state)?))
}

#[derive(Deserialize)]
struct ProfileSelect {
    profile_id: String,
}

async fn set_active_profile(
    State(state): State<AppState>,
    Json(body): Json<ProfileSelect>,
) -> ApiResult<ActiveSession> {
    let user = active_user_record(&state)?;
    let prefs = state.storage.users.preferences(&user);
    let profile = prefs
        .profile(body.profile_id.trim())
        .cloned()
        .ok_or_else(|| ApiError::NotFound("profile".to_string()))?;
    if let Some(personality_id) = profile.personality_id.as_deref() {
        require_personality(&state, personality_id)?;
    }
    if let Some(voice_id) = profile.voice_id.as_deref() {
        if !state.storage.voices.exists(voice_id)? {
            return Err(ApiError::InvalidRequest("Profile voice not found".to_string()));
        }
    }
    state.storage.users.update(
        &user.id,
        UserPatch {
            current_personality_id: Some(profile.personality_id),
            current_voice_id: Some(profile.voice_id),
            ..Default::default()
        },
    )?;
    Ok(Json(active_session_response(&state)?))
}

async fn reset_active(State(state): State<AppState>) -> ApiResult<ActiveSession> {
    let user = active_user_record(&state)?;
    let prefs = state.storage.users.preferences(&user);
    let mut personality_id = prefs.default_personality_id.clone();
    let mut voice_id = None;
    if let Some(profile) = prefs
        .default_profile_id
        .as_deref()
        .and_then(|id| prefs.profile(id))
    {
        personality_id = profile.personality_id.clone().or(personality_id);
        voice_id = profile.voice_id.clone();
    }
    state.storage.users.update(
        &user.id,
        UserPatch {
            current_personality_id: Some(personality_id),
            current_voice_id: Some(voice_id),
            ..Default::default()
        },
    )?;
    Ok(Json(active_session_response(&state)?))
}

// --- Device ---

async fn device_status(State(state): State<AppState>) -> ApiResult<hearth_storage::DeviceStatus> {
    Ok(Json(state.storage.settings.device_status()?))
}

async fn patch_device(
    State(state): State<AppState>,
    Json(patch): Json<DevicePatch>,
) -> ApiResult<hearth_storage::DeviceStatus> {
    let status = state.storage.settings.update_device(patch)?;
    state.registry.push_device_event(&status);
    Ok(Json(status))
}

/// Force-close the embedded device session, if any.
async fn disconnect_device(State(state): State<AppState>) -> ApiResult<hearth_storage::DeviceStatus> {
    state.registry.evict_device();
    let status = state.storage.settings.update_device(DevicePatch {
        ws_status: Some("disconnected".to_string()),
        session_id: Some(None),
        ..Default::default()
    })?;
    state.registry.push_device_event(&status);
    Ok(Json(status))
}

async fn device_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let current = state.storage.settings.device_status().unwrap_or_default();
    let updates = ReceiverStream::new(state.registry.watch_device());
    let stream = futures::stream::iter(vec![Event::default().json_data(&current)])
        .chain(updates.map(|status| Event::default().json_data(&status)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

// --- Models ---

#[derive(Serialize)]
struct ModelsInfo {
    llm: ModelSlot,
    stt: ModelSlot,
    tts: ModelSlot,
}

#[derive(Serialize)]
struct ModelSlot {
    model_ref: String,
    loaded: bool,
}

async fn models_info(State(state): State<AppState>) -> Json<ModelsInfo> {
    let loaded = state.facade.is_ready();
    let llm_ref = state
        .facade
        .model_ref()
        .await
        .unwrap_or_else(|| state.settings.engine.llm_model.clone());
    Json(ModelsInfo {
        llm: ModelSlot {
            model_ref: llm_ref,
            loaded,
        },
        stt: ModelSlot {
            model_ref: state.settings.engine.stt_model.clone(),
            loaded,
        },
        tts: ModelSlot {
            model_ref: state.settings.engine.tts_model.clone(),
            loaded,
        },
    })
}

#[derive(Deserialize)]
struct ModelSwitch {
    model_ref: String,
}

async fn switch_model(
    State(state): State<AppState>,
    Json(body): Json<ModelSwitch>,
) -> ApiResult<ModelsInfo> {
    let model_ref = body.model_ref.trim().to_string();
    if model_ref.is_empty() {
        return Err(ApiError::InvalidRequest("model_ref is required".to_string()));
    }
    // Load outside the inference guard, then swap under it.
    let llm = (state.model_factory)(&model_ref);
    state
        .facade
        .switch_model(llm)
        .await
        .map_err(|_| ApiError::NotReady)?;
    state
        .storage
        .settings
        .set("llm_model", Some(&model_ref))?;
    Ok(Json(models_info(State(state)).await.0))
}

// --- Packs ---

async fn list_packs(State(state): State<AppState>) -> ApiResult<Vec<hearth_storage::Pack>> {
    Ok(Json(state.storage.packs.list()?))
}

#[derive(Deserialize)]
struct PackVoiceEntry {
    voice_id: String,
    voice_name: String,
    #[serde(default)]
    voice_description: Option<String>,
}

#[derive(Deserialize)]
struct PackExperienceEntry {
    name: String,
    prompt: String,
    #[serde(default)]
    short_description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    voice_id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<ExperienceKind>,
}

#[derive(Deserialize)]
struct PackInstall {
    manifest: PackManifest,
    #[serde(default)]
    voices: Vec<PackVoiceEntry>,
    #[serde(default)]
    experiences: Vec<PackExperienceEntry>,
}

/// Register a content pack and its bundled voices and experiences.
async fn install_pack(
    State(state): State<AppState>,
    Json(body): Json<PackInstall>,
) -> ApiResult<hearth_storage::Pack> {
    if body.manifest.id.trim().is_empty() {
        return Err(ApiError::InvalidRequest("pack id is required".to_string()));
    }
    let pack = state.storage.packs.install(&body.manifest)?;

    for voice in &body.voices {
        state.storage.voices.upsert(
            voice.voice_id.trim(),
            voice.voice_name.trim(),
            None,
            voice.voice_description.as_deref(),
            true,
        )?;
        state
            .storage
            .packs
            .claim_voice(&pack.id, voice.voice_id.trim())?;
    }

    let fallback_voice = state.storage.voices.default_voice_id()?;
    for entry in body.experiences {
        let voice_id = entry
            .voice_id
            .filter(|v| !v.trim().is_empty())
            .or_else(|| fallback_voice.clone())
            .ok_or_else(|| ApiError::InvalidRequest("No voices available".to_string()))?;
        let experience = state.storage.experiences.create(NewExperience {
            name: entry.name,
            prompt: entry.prompt,
            short_description: entry.short_description.unwrap_or_default(),
            tags: entry.tags,
            voice_id: voice_id.trim().to_string(),
            kind: entry.kind.unwrap_or(ExperienceKind::Personality),
            is_global: false,
            img_src: None,
        })?;
        state
            .storage
            .packs
            .claim_experience(&pack.id, &experience.id)?;
    }

    Ok(Json(pack))
}

#[derive(Deserialize)]
struct PackEnable {
    is_enabled: bool,
}

async fn set_pack_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<PackEnable>,
) -> ApiResult<hearth_storage::Pack> {
    state
        .storage
        .packs
        .set_enabled(&id, body.is_enabled)?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("pack {id}")))
}

async fn uninstall_pack(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<OkResponse> {
    if !state.storage.packs.uninstall(&id)? {
        return Err(ApiError::NotFound(format!("pack {id}")));
    }
    Ok(Json(OkResponse { ok: true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_engine::{InferenceFacade, StubLanguageModel};
    use hearth_storage::Storage;
    use std::sync::Arc;

    fn test_state() -> AppState {
        let storage = Arc::new(Storage::in_memory().unwrap());
        storage.seed_defaults().unwrap();
        AppState::new(
            hearth_config::Settings::default(),
            storage,
            Arc::new(InferenceFacade::new()),
            Arc::new(|model_ref: &str| {
                Arc::new(StubLanguageModel::new(model_ref, "ok")) as Arc<dyn hearth_engine::LanguageModel>
            }),
        )
    }

    #[test]
    fn test_router_creation() {
        let _ = create_router(test_state());
    }

    #[tokio::test]
    async fn test_startup_status_reflects_engines() {
        let state = test_state();
        let status = startup_status(State(state.clone())).await.0;
        assert!(status.seeded);
        assert!(!status.engines_ready);
        assert!(!status.ready);
    }

    #[tokio::test]
    async fn test_preferences_require_active_user() {
        let state = test_state();
        assert!(my_preferences(State(state.clone())).await.is_err());

        let user = state.storage.users.create("A", None, "", None).unwrap();
        state
            .storage
            .settings
            .set_active_user_id(Some(&user.id))
            .unwrap();
        let prefs = my_preferences(State(state)).await.unwrap().0;
        assert!(prefs.use_default_voice_everywhere);
    }

    #[tokio::test]
    async fn test_set_preferences_validates_voice() {
        let state = test_state();
        let user = state.storage.users.create("A", None, "", None).unwrap();
        state
            .storage
            .settings
            .set_active_user_id(Some(&user.id))
            .unwrap();

        let bad = set_my_preferences(
            State(state.clone()),
            Json(PreferencesUpdate {
                default_voice_id: Some("missing".to_string()),
                default_personality_id: None,
                default_profile_id: None,
                use_default_voice_everywhere: None,
                allow_experience_voice_override: None,
            }),
        )
        .await;
        assert!(bad.is_err());

        let good = set_my_preferences(
            State(state),
            Json(PreferencesUpdate {
                default_voice_id: Some("ember".to_string()),
                default_personality_id: None,
                default_profile_id: None,
                use_default_voice_everywhere: Some(false),
                allow_experience_voice_override: None,
            }),
        )
        .await
        .unwrap()
        .0;
        assert_eq!(good.default_voice_id.as_deref(), Some("ember"));
        assert!(!good.use_default_voice_everywhere);
    }
}
