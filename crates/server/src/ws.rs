//! Unified WebSocket voice-session endpoint.
//!
//! One endpoint serves both client kinds, selected by query parameter
//! (`/ws?client=desktop|device`) or an `x-client-kind` header override.
//!
//! Desktop protocol (JSON text frames):
//! - client: `{"type":"audio","data":"<base64 s16le PCM>"}`,
//!   `{"type":"end_of_speech"}`, `{"type":"cancel"}`,
//!   `{"type":"config","voice":...,"system_prompt":...}`
//! - server: `{"type":"session_started"}`, `{"type":"transcription"}`,
//!   `{"type":"response"}`, `{"type":"audio"}`, `{"type":"audio_end"}`
//!
//! Device protocol (binary PCM in, Opus out):
//! - client: raw s16le 16 kHz frames;
//!   `{"type":"instruction","msg":"end_of_speech"|"INTERRUPT"}`
//! - server: `{"type":"auth",...}` handshake, `{"type":"server","msg":
//!   "AUDIO.COMMITTED"|"RESPONSE.CREATED"|"RESPONSE.COMPLETE"|
//!   "SESSION.END"}` control envelopes bracketing binary Opus frames.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::Response;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use async_trait::async_trait;
use hearth_core::{boost_limit_pcm16, CancelToken, ClientKind};
use hearth_pipeline::{
    AudioSegmenter, OpusPacketizer, PipelineError, ResponseSink, SegmenterConfig, SessionOverrides,
    TurnController, VoiceResolver,
};
use hearth_storage::{
    DevicePatch, Experience, ExperienceKind, ExperienceStore, SessionStore, SettingsStore, Storage,
    UserStore,
};

use crate::state::AppState;

const DEFAULT_VOLUME: i64 = 100;
const PREBUFFER_MS: usize = 300;

/// Client → server messages, both transports.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Audio {
        data: String,
    },
    EndOfSpeech,
    Cancel,
    Config {
        #[serde(default)]
        voice: Option<String>,
        #[serde(default)]
        system_prompt: Option<String>,
    },
    Instruction {
        msg: String,
    },
}

/// Server → desktop messages.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionStarted { session_id: String },
    Transcription { text: String },
    Response { text: String },
    Audio { data: String },
    AudioEnd,
}

/// Server → device control envelopes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceMessage {
    Auth {
        volume_control: i64,
        pitch_factor: f32,
        is_ota: bool,
        is_reset: bool,
    },
    Server {
        msg: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        volume_control: Option<i64>,
    },
}

type SharedSender = Arc<tokio::sync::Mutex<SplitSink<WebSocket, Message>>>;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    client: Option<String>,
}

/// Handle the websocket upgrade for `/ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Response {
    let mut kind = query
        .client
        .as_deref()
        .and_then(|c| c.parse::<ClientKind>().ok())
        .unwrap_or(ClientKind::Desktop);
    if let Some(header) = headers
        .get("x-client-kind")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<ClientKind>().ok())
    {
        kind = header;
    }
    ws.on_upgrade(move |socket| handle_socket(socket, kind, state))
}

async fn handle_socket(socket: WebSocket, kind: ClientKind, state: AppState) {
    if !state.ready() {
        // Before readiness the endpoint accepts and immediately closes.
        tracing::warn!("Session refused: server not ready");
        let _ = socket.close().await;
        return;
    }

    let session = match SessionSetup::resolve(&state, kind) {
        Ok(session) => session,
        Err(e) => {
            tracing::error!("Session setup failed: {e}");
            let _ = socket.close().await;
            return;
        }
    };

    let (sender, receiver) = socket.split();
    let sender: SharedSender = Arc::new(tokio::sync::Mutex::new(sender));

    tracing::info!(session = %session.session_id, kind = kind.as_str(), "Client connected");

    match kind {
        ClientKind::Desktop => desktop_session(sender, receiver, session, state).await,
        ClientKind::Device => device_session(sender, receiver, session, state).await,
    }
}

/// Everything resolved once at connection accept.
struct SessionSetup {
    session_id: String,
    controller: Arc<TurnController>,
    cancel: CancelToken,
    overrides: Arc<parking_lot::Mutex<SessionOverrides>>,
    volume: i64,
}

impl SessionSetup {
    fn resolve(state: &AppState, kind: ClientKind) -> Result<Self, hearth_storage::StorageError> {
        let session_id = Uuid::new_v4().to_string();
        let user_id = state.storage.settings.active_user_id()?;
        let experience = resolve_personality(&state.storage, user_id.as_deref());

        if let Err(e) = state.storage.sessions.start(
            &session_id,
            kind.as_str(),
            user_id.as_deref(),
            experience.as_ref().map(|e| e.id.as_str()),
        ) {
            tracing::error!(session = %session_id, "Failed to persist session start: {e}");
        }

        let volume = state
            .storage
            .settings
            .get("output_volume")
            .ok()
            .flatten()
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(DEFAULT_VOLUME);

        let overrides = Arc::new(parking_lot::Mutex::new(SessionOverrides::default()));
        let cancel = CancelToken::new();
        let voices = VoiceResolver::new(
            state.storage.clone(),
            state
                .settings
                .storage
                .voices_dir
                .as_ref()
                .map(std::path::PathBuf::from),
        );
        let controller = Arc::new(TurnController::new(
            state.facade.clone(),
            state.storage.clone(),
            voices,
            session_id.clone(),
            user_id.clone(),
            experience.clone(),
            overrides.clone(),
            cancel.clone(),
            state.settings.engine.max_tokens,
            state.settings.engine.max_history_messages,
            state.settings.engine.thinking_model,
        ));

        Ok(Self {
            session_id,
            controller,
            cancel,
            overrides,
            volume,
        })
    }
}

/// Personality resolution at connect time: active personality on the
/// user record, then the default profile's personality, then the
/// default personality preference, then the first visible personality.
pub fn resolve_personality(storage: &Storage, user_id: Option<&str>) -> Option<Experience> {
    let get_personality = |id: &str| {
        storage
            .experiences
            .get(id)
            .ok()
            .flatten()
            .filter(|e| e.kind == ExperienceKind::Personality)
    };

    if let Some(user) = user_id.and_then(|id| storage.users.get(id).ok().flatten()) {
        if let Some(found) = user.current_personality_id.as_deref().and_then(get_personality) {
            return Some(found);
        }
        let prefs = storage.users.preferences(&user);
        if let Some(profile_id) = prefs.default_profile_id.as_deref() {
            if let Some(found) = prefs
                .profile(profile_id)
                .and_then(|p| p.personality_id.as_deref())
                .and_then(get_personality)
            {
                return Some(found);
            }
        }
        if let Some(found) = prefs
            .default_personality_id
            .as_deref()
            .and_then(get_personality)
        {
            return Some(found);
        }
    }
    storage.experiences.first_visible_personality().ok().flatten()
}

// ---------------------------------------------------------------------
// Desktop transport
// ---------------------------------------------------------------------

/// Desktop framing: JSON envelopes, base64 PCM, a short prebuffer before
/// the first audio message of each turn.
struct DesktopSink {
    sender: SharedSender,
    prebuffer: Vec<u8>,
    prebuffer_target: usize,
    started: bool,
}

impl DesktopSink {
    fn new(sender: SharedSender, output_sample_rate: u32) -> Self {
        Self {
            sender,
            prebuffer: Vec::new(),
            prebuffer_target: output_sample_rate as usize * PREBUFFER_MS / 1000 * 2,
            started: false,
        }
    }

    async fn send(&self, msg: &ServerMessage) -> Result<(), PipelineError> {
        let text = serde_json::to_string(msg).map_err(|_| PipelineError::TransportClosed)?;
        self.sender
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|_| PipelineError::TransportClosed)
    }
}

#[async_trait]
impl ResponseSink for DesktopSink {
    async fn utterance_ack(&mut self, transcript: &str) -> Result<(), PipelineError> {
        self.send(&ServerMessage::Transcription {
            text: transcript.to_string(),
        })
        .await
    }

    async fn response_created(&mut self, text: &str) -> Result<(), PipelineError> {
        self.send(&ServerMessage::Response {
            text: text.to_string(),
        })
        .await
    }

    async fn audio_chunk(&mut self, pcm: &[u8]) -> Result<(), PipelineError> {
        if !self.started {
            self.prebuffer.extend_from_slice(pcm);
            if self.prebuffer.len() < self.prebuffer_target {
                return Ok(());
            }
            self.started = true;
            let data = BASE64.encode(&self.prebuffer);
            self.prebuffer.clear();
            return self.send(&ServerMessage::Audio { data }).await;
        }
        self.send(&ServerMessage::Audio {
            data: BASE64.encode(pcm),
        })
        .await
    }

    async fn audio_end(&mut self) -> Result<(), PipelineError> {
        if !self.prebuffer.is_empty() {
            let data = BASE64.encode(&self.prebuffer);
            self.prebuffer.clear();
            let _ = self.send(&ServerMessage::Audio { data }).await;
        }
        self.started = false;
        self.send(&ServerMessage::AudioEnd).await
    }
}

async fn desktop_session(
    sender: SharedSender,
    mut receiver: SplitStream<WebSocket>,
    session: SessionSetup,
    state: AppState,
) {
    let SessionSetup {
        session_id,
        controller,
        cancel,
        overrides,
        ..
    } = session;
    state.registry.register_desktop(&session_id);
    let output_rate = state.facade.output_sample_rate();

    let handshake = ServerMessage::SessionStarted {
        session_id: session_id.clone(),
    };
    if let Ok(text) = serde_json::to_string(&handshake) {
        let _ = sender.lock().await.send(Message::Text(text)).await;
    }

    // Speak first, then listen.
    {
        let mut sink = DesktopSink::new(sender.clone(), output_rate);
        controller.run_greeting(&mut sink).await;
    }

    let mut audio_buffer: Vec<u8> = Vec::new();
    let mut current_turn: Option<tokio::task::JoinHandle<()>> = None;

    while let Some(msg) = receiver.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let Ok(parsed) = serde_json::from_str::<ClientMessage>(&text) else {
                    // Malformed control messages are ignored.
                    continue;
                };
                match parsed {
                    ClientMessage::Config {
                        voice,
                        system_prompt,
                    } => {
                        let mut guard = overrides.lock();
                        if voice.is_some() {
                            guard.voice = voice;
                        }
                        if system_prompt.is_some() {
                            guard.system_prompt = system_prompt;
                        }
                        tracing::info!(session = %session_id, "Session config updated");
                    }
                    ClientMessage::Audio { data } => {
                        let Ok(bytes) = BASE64.decode(data.as_bytes()) else {
                            tracing::warn!(session = %session_id, "Undecodable audio payload");
                            continue;
                        };
                        // Barge-in: settle the in-flight turn before any
                        // new input is buffered.
                        if current_turn.as_ref().is_some_and(|t| !t.is_finished()) {
                            cancel.set();
                            if let Some(turn) = current_turn.take() {
                                let _ = turn.await;
                            }
                            cancel.clear();
                        }
                        audio_buffer.extend_from_slice(&bytes);
                    }
                    ClientMessage::EndOfSpeech => {
                        if audio_buffer.is_empty() {
                            continue;
                        }
                        let pcm = std::mem::take(&mut audio_buffer);
                        let transcript = match state.facade.transcribe(pcm).await {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::error!(session = %session_id, "Transcription error: {e}");
                                continue;
                            }
                        };
                        if transcript.trim().is_empty() {
                            continue;
                        }
                        let controller = controller.clone();
                        let sender = sender.clone();
                        current_turn = Some(tokio::spawn(async move {
                            let mut sink = DesktopSink::new(sender, output_rate);
                            controller.run_turn(&transcript, &mut sink).await;
                        }));
                    }
                    ClientMessage::Cancel => {
                        if current_turn.as_ref().is_some_and(|t| !t.is_finished()) {
                            cancel.set();
                        }
                        audio_buffer.clear();
                    }
                    ClientMessage::Instruction { .. } => {}
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                tracing::error!(session = %session_id, "WebSocket error: {e}");
                break;
            }
        }
    }

    // Teardown.
    cancel.set();
    if let Some(turn) = current_turn.take() {
        turn.abort();
    }
    state.registry.unregister_desktop(&session_id);
    if let Err(e) = state.storage.sessions.end(&session_id) {
        tracing::error!(session = %session_id, "Failed to close session: {e}");
    }
    tracing::info!(session = %session_id, "Session ended");
}

// ---------------------------------------------------------------------
// Device transport
// ---------------------------------------------------------------------

/// Device framing: loudness-boosted PCM packed into Opus frames,
/// bracketed by JSON control envelopes.
struct DeviceSink {
    sender: SharedSender,
    packetizer: OpusPacketizer,
    gain_db: f32,
    ceiling: f32,
    volume: i64,
}

impl DeviceSink {
    fn new(
        sender: SharedSender,
        gain_db: f32,
        ceiling: f32,
        volume: i64,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            sender,
            packetizer: OpusPacketizer::new()?,
            gain_db,
            ceiling,
            volume,
        })
    }

    async fn send_control(&mut self, msg: &DeviceMessage) -> Result<(), PipelineError> {
        let text = serde_json::to_string(msg).map_err(|_| PipelineError::TransportClosed)?;
        self.sender
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|_| PipelineError::TransportClosed)
    }

    async fn send_packets(&mut self, packets: Vec<Vec<u8>>) -> Result<(), PipelineError> {
        let mut sender = self.sender.lock().await;
        for packet in packets {
            sender
                .send(Message::Binary(packet))
                .await
                .map_err(|_| PipelineError::TransportClosed)?;
        }
        Ok(())
    }
}

#[async_trait]
impl ResponseSink for DeviceSink {
    async fn utterance_ack(&mut self, _transcript: &str) -> Result<(), PipelineError> {
        self.send_control(&DeviceMessage::Server {
            msg: "AUDIO.COMMITTED",
            volume_control: None,
        })
        .await
    }

    async fn response_created(&mut self, _text: &str) -> Result<(), PipelineError> {
        self.send_control(&DeviceMessage::Server {
            msg: "RESPONSE.CREATED",
            volume_control: Some(self.volume),
        })
        .await
    }

    async fn audio_chunk(&mut self, pcm: &[u8]) -> Result<(), PipelineError> {
        let mut boosted = pcm.to_vec();
        boost_limit_pcm16(&mut boosted, self.gain_db, self.ceiling);
        let packets = self.packetizer.push(&boosted);
        self.send_packets(packets).await
    }

    async fn audio_end(&mut self) -> Result<(), PipelineError> {
        let packets = self.packetizer.flush(true);
        let _ = self.send_packets(packets).await;
        self.packetizer.close();
        self.send_control(&DeviceMessage::Server {
            msg: "RESPONSE.COMPLETE",
            volume_control: None,
        })
        .await
    }
}

async fn device_session(
    sender: SharedSender,
    mut receiver: SplitStream<WebSocket>,
    session: SessionSetup,
    state: AppState,
) {
    let SessionSetup {
        session_id,
        controller,
        cancel,
        overrides,
        volume,
        ..
    } = session;

    let mut segmenter = match AudioSegmenter::with_vad(SegmenterConfig {
        sample_rate: state.settings.audio.input_sample_rate,
        frame_duration_ms: state.settings.audio.frame_duration_ms,
        silence_duration_secs: state.settings.audio.silence_duration_secs,
    }) {
        Ok(segmenter) => segmenter,
        Err(e) => {
            tracing::error!(session = %session_id, "Segmenter init failed: {e}");
            return;
        }
    };

    let mut evict_rx = state.registry.register_device(&session_id);
    publish_device_status(&state, Some(&session_id), "connected");

    let auth = DeviceMessage::Auth {
        volume_control: volume,
        pitch_factor: 1.0,
        is_ota: false,
        is_reset: false,
    };
    if let Ok(text) = serde_json::to_string(&auth) {
        if sender.lock().await.send(Message::Text(text)).await.is_err() {
            finish_device_session(&state, &session_id);
            return;
        }
    }

    let gain_db = state.settings.audio.gain_db;
    let ceiling = state.settings.audio.ceiling;

    // Greeting before the first utterance.
    match DeviceSink::new(sender.clone(), gain_db, ceiling, volume) {
        Ok(mut sink) => controller.run_greeting(&mut sink).await,
        Err(e) => tracing::error!(session = %session_id, "Greeting sink failed: {e}"),
    }

    // Turns run inline: a finalized utterance is answered before the
    // next transport message is read.
    let run_turn = |utterance: Vec<u8>| {
        let controller = controller.clone();
        let sender = sender.clone();
        let state = state.clone();
        let session_id = session_id.clone();
        async move {
            let transcript = match state.facade.transcribe(utterance).await {
                Ok(text) => text,
                Err(e) => {
                    tracing::error!(session = %session_id, "Transcription error: {e}");
                    return;
                }
            };
            if transcript.trim().is_empty() {
                return;
            }
            match DeviceSink::new(sender, gain_db, ceiling, volume) {
                Ok(mut sink) => controller.run_turn(&transcript, &mut sink).await,
                Err(e) => tracing::error!(session = %session_id, "Turn sink failed: {e}"),
            }
        }
    };

    loop {
        tokio::select! {
            _ = evict_rx.recv() => {
                tracing::info!(session = %session_id, "Device connection evicted");
                let end = DeviceMessage::Server { msg: "SESSION.END", volume_control: None };
                if let Ok(text) = serde_json::to_string(&end) {
                    let _ = sender.lock().await.send(Message::Text(text)).await;
                }
                let _ = sender.lock().await.close().await;
                break;
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Binary(bytes))) => {
                        for utterance in segmenter.push(&bytes) {
                            run_turn(utterance).await;
                        }
                    }
                    Some(Ok(Message::Text(text))) => {
                        let Ok(parsed) = serde_json::from_str::<ClientMessage>(&text) else {
                            continue;
                        };
                        match parsed {
                            ClientMessage::Instruction { msg } => match msg.as_str() {
                                "end_of_speech" => {
                                    if let Some(utterance) = segmenter.finalize() {
                                        run_turn(utterance).await;
                                    }
                                }
                                "INTERRUPT" => {
                                    cancel.set();
                                    segmenter.interrupt();
                                }
                                other => {
                                    tracing::debug!(session = %session_id, "Unknown instruction: {other}");
                                }
                            },
                            ClientMessage::Config { voice, system_prompt } => {
                                let mut guard = overrides.lock();
                                if voice.is_some() {
                                    guard.voice = voice;
                                }
                                if system_prompt.is_some() {
                                    guard.system_prompt = system_prompt;
                                }
                            }
                            _ => {}
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!(session = %session_id, "WebSocket error: {e}");
                        break;
                    }
                }
            }
        }
    }

    cancel.set();
    state.registry.unregister_device(&session_id);
    finish_device_session(&state, &session_id);
    tracing::info!(session = %session_id, "Session ended");
}

fn publish_device_status(state: &AppState, session_id: Option<&str>, ws_status: &str) {
    let patch = DevicePatch {
        ws_status: Some(ws_status.to_string()),
        ws_last_seen: Some(hearth_storage::db::now_ts()),
        session_id: Some(session_id.map(str::to_string)),
        ..Default::default()
    };
    match state.storage.settings.update_device(patch) {
        Ok(status) => state.registry.push_device_event(&status),
        Err(e) => tracing::error!("Failed to update device status: {e}"),
    }
}

fn finish_device_session(state: &AppState, session_id: &str) {
    publish_device_status(state, None, "disconnected");
    if let Err(e) = state.storage.sessions.end(session_id) {
        tracing::error!(session = %session_id, "Failed to close session: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hearth_storage::{ExperiencePatch, NewExperience, Preferences, ProfileEntry, UserPatch};

    fn seeded_storage() -> Arc<Storage> {
        let storage = Arc::new(Storage::in_memory().unwrap());
        storage.seed_defaults().unwrap();
        storage
    }

    fn new_personality(name: &str) -> NewExperience {
        NewExperience {
            name: name.to_string(),
            prompt: format!("You are {name}."),
            short_description: String::new(),
            tags: vec![],
            voice_id: "ember".to_string(),
            kind: ExperienceKind::Personality,
            is_global: false,
            img_src: None,
        }
    }

    #[test]
    fn test_resolution_without_user_is_first_visible_personality() {
        let storage = seeded_storage();
        let newest = storage
            .experiences
            .create(new_personality("Newest"))
            .unwrap();
        let resolved = resolve_personality(&storage, None).unwrap();
        assert_eq!(resolved.id, newest.id);

        // Hidden personalities are skipped deterministically.
        storage
            .experiences
            .update(
                &newest.id,
                ExperiencePatch {
                    is_visible: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        let resolved = resolve_personality(&storage, None).unwrap();
        assert_eq!(resolved.name, "Companion");
    }

    #[test]
    fn test_resolution_precedence() {
        let storage = seeded_storage();
        let active = storage.experiences.create(new_personality("Active")).unwrap();
        let profile_p = storage.experiences.create(new_personality("Profile")).unwrap();
        let default_p = storage.experiences.create(new_personality("Default")).unwrap();

        let user = storage.users.create("A", None, "", None).unwrap();
        let mut prefs = Preferences::default();
        prefs.default_profile_id = Some("p1".to_string());
        prefs.profiles.push(ProfileEntry {
            id: "p1".to_string(),
            name: "P".to_string(),
            voice_id: None,
            personality_id: Some(profile_p.id.clone()),
        });
        prefs.default_personality_id = Some(default_p.id.clone());
        storage.users.save_preferences(&user.id, &prefs).unwrap();
        storage
            .users
            .update(
                &user.id,
                UserPatch {
                    current_personality_id: Some(Some(active.id.clone())),
                    ..Default::default()
                },
            )
            .unwrap();

        // Active beats profile beats default preference.
        let resolved = resolve_personality(&storage, Some(&user.id)).unwrap();
        assert_eq!(resolved.id, active.id);

        storage
            .users
            .update(
                &user.id,
                UserPatch {
                    current_personality_id: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        let resolved = resolve_personality(&storage, Some(&user.id)).unwrap();
        assert_eq!(resolved.id, profile_p.id);

        let mut prefs_no_profile = prefs.clone();
        prefs_no_profile.default_profile_id = None;
        storage
            .users
            .save_preferences(&user.id, &prefs_no_profile)
            .unwrap();
        let resolved = resolve_personality(&storage, Some(&user.id)).unwrap();
        assert_eq!(resolved.id, default_p.id);
    }

    #[test]
    fn test_non_personality_active_is_skipped() {
        let storage = seeded_storage();
        let game = storage
            .experiences
            .create(NewExperience {
                kind: ExperienceKind::Game,
                ..new_personality("Quiz")
            })
            .unwrap();
        let user = storage.users.create("A", None, "", None).unwrap();
        storage
            .users
            .update(
                &user.id,
                UserPatch {
                    current_personality_id: Some(Some(game.id)),
                    ..Default::default()
                },
            )
            .unwrap();
        // A game set as "active personality" does not satisfy the
        // personality chain; resolution falls through.
        let resolved = resolve_personality(&storage, Some(&user.id)).unwrap();
        assert_eq!(resolved.name, "Companion");
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"audio","data":"AAAA"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Audio { .. }));

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"end_of_speech"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::EndOfSpeech));

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"instruction","msg":"INTERRUPT"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Instruction { msg } if msg == "INTERRUPT"));

        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"bogus"}"#).is_err());
    }

    #[test]
    fn test_device_message_wire_shape() {
        let auth = DeviceMessage::Auth {
            volume_control: 90,
            pitch_factor: 1.0,
            is_ota: false,
            is_reset: false,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&auth).unwrap()).unwrap();
        assert_eq!(value["type"], "auth");
        assert_eq!(value["volume_control"], 90);

        let created = DeviceMessage::Server {
            msg: "RESPONSE.CREATED",
            volume_control: Some(100),
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&created).unwrap()).unwrap();
        assert_eq!(value["type"], "server");
        assert_eq!(value["msg"], "RESPONSE.CREATED");

        let complete = DeviceMessage::Server {
            msg: "RESPONSE.COMPLETE",
            volume_control: None,
        };
        let text = serde_json::to_string(&complete).unwrap();
        assert!(!text.contains("volume_control"));
    }
}
