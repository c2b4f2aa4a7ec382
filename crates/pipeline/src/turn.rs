//! One conversational turn, from finalized utterance to streamed reply.

use crate::prompt::{
    behavior_constraints, build_messages, build_system_prompt, greeting_instruction, RuntimeContext,
};
use crate::sanitize::sanitize_spoken_text;
use crate::voice::VoiceResolver;
use crate::PipelineError;
use async_trait::async_trait;
use hearth_core::{CancelToken, ChatMessage, Role};
use hearth_engine::InferenceFacade;
use hearth_storage::{ConversationLog, Experience, ExperienceKind, Storage, UserStore};
use parking_lot::Mutex;
use std::sync::Arc;

/// Synthetic user entry logged before the assistant greeting so that
/// later context builds still see alternating roles.
pub const CONNECTED_PLACEHOLDER: &str = "[connected]";

const GREETING_MAX_TOKENS: usize = 50;

/// Transport-facing output of a turn. One implementation per client
/// kind lives in the server crate; errors mean the transport is gone
/// and quietly end the stream.
#[async_trait]
pub trait ResponseSink: Send {
    /// Acknowledge that the utterance was received (transcription echo
    /// or device commit ack).
    async fn utterance_ack(&mut self, transcript: &str) -> Result<(), PipelineError>;

    /// Announce the generated reply before audio starts.
    async fn response_created(&mut self, text: &str) -> Result<(), PipelineError>;

    /// One bounded PCM chunk of synthesized speech.
    async fn audio_chunk(&mut self, pcm: &[u8]) -> Result<(), PipelineError>;

    /// End of the audio stream for this turn.
    async fn audio_end(&mut self) -> Result<(), PipelineError>;
}

/// Session-scoped overrides mutable via desktop config messages.
#[derive(Debug, Default)]
pub struct SessionOverrides {
    pub voice: Option<String>,
    pub system_prompt: Option<String>,
}

/// Per-session turn orchestrator.
///
/// Owns no transport state; the session protocol hands it a sink per
/// turn. Inference and persistence failures are logged and abort the
/// turn without surfacing to the client.
pub struct TurnController {
    facade: Arc<InferenceFacade>,
    storage: Arc<Storage>,
    voices: VoiceResolver,
    session_id: String,
    user_id: Option<String>,
    experience: Option<Experience>,
    overrides: Arc<Mutex<SessionOverrides>>,
    cancel: CancelToken,
    max_tokens: usize,
    max_history_messages: usize,
    thinking_model: bool,
    allow_paralinguistic: bool,
}

impl TurnController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        facade: Arc<InferenceFacade>,
        storage: Arc<Storage>,
        voices: VoiceResolver,
        session_id: impl Into<String>,
        user_id: Option<String>,
        experience: Option<Experience>,
        overrides: Arc<Mutex<SessionOverrides>>,
        cancel: CancelToken,
        max_tokens: usize,
        max_history_messages: usize,
        thinking_model: bool,
    ) -> Self {
        Self {
            facade,
            storage,
            voices,
            session_id: session_id.into(),
            user_id,
            experience,
            overrides,
            cancel,
            max_tokens,
            max_history_messages,
            thinking_model,
            allow_paralinguistic: true,
        }
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn experience_kind(&self) -> ExperienceKind {
        self.experience
            .as_ref()
            .map(|e| e.kind)
            .unwrap_or(ExperienceKind::Personality)
    }

    /// Run a full turn for a finalized utterance. All failure paths end
    /// the turn quietly; the session returns to listening either way.
    pub async fn run_turn(&self, transcript: &str, sink: &mut dyn ResponseSink) {
        let transcript = transcript.trim();
        if transcript.is_empty() {
            return;
        }
        tracing::info!(session = %self.session_id, "Transcript: {transcript}");

        if let Err(e) = sink.utterance_ack(transcript).await {
            tracing::error!(session = %self.session_id, "Failed to ack utterance: {e}");
            return;
        }

        // New turn: re-arm cancellation, then build context strictly
        // before logging the new user entry so it is not duplicated
        // into its own context.
        self.cancel.clear();
        let messages = self.build_context(transcript);

        if let Err(e) =
            self.storage
                .conversations
                .log_turn("user", transcript, Some(&self.session_id))
        {
            tracing::error!(session = %self.session_id, "Failed to log user turn: {e}");
        }

        let reply = match self
            .facade
            .generate(messages, self.max_tokens, self.thinking_model)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(session = %self.session_id, "Generation error: {e}");
                return;
            }
        };

        let reply = sanitize_spoken_text(&reply, self.allow_paralinguistic);

        if self.cancel.is_set() {
            tracing::warn!(session = %self.session_id, "Cancelled before reply was sent");
            return;
        }
        if reply.is_empty() {
            tracing::warn!(session = %self.session_id, "Empty reply after sanitization");
            return;
        }

        tracing::info!(session = %self.session_id, "Reply: {reply}");

        if sink.response_created(&reply).await.is_err() {
            return;
        }

        if let Err(e) =
            self.storage
                .conversations
                .log_turn("assistant", &reply, Some(&self.session_id))
        {
            tracing::error!(session = %self.session_id, "Failed to log assistant turn: {e}");
        }

        self.stream_speech(&reply, sink).await;
    }

    /// Greeting turn: a synthetic system-authored prompt whose output is
    /// synthesized and streamed exactly like a normal turn, then logged
    /// behind a placeholder user entry.
    pub async fn run_greeting(&self, sink: &mut dyn ResponseSink) {
        let instruction = greeting_instruction(self.experience_kind());
        self.cancel.clear();
        let messages = self.build_context(instruction);

        let greeting = match self
            .facade
            .generate(messages, GREETING_MAX_TOKENS, self.thinking_model)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(session = %self.session_id, "Greeting generation failed: {e}");
                return;
            }
        };
        let greeting = {
            let sanitized = sanitize_spoken_text(&greeting, self.allow_paralinguistic);
            if sanitized.is_empty() {
                "Hello!".to_string()
            } else {
                sanitized
            }
        };

        tracing::info!(session = %self.session_id, "Greeting: {greeting}");

        if sink.response_created(&greeting).await.is_err() {
            return;
        }

        self.stream_speech(&greeting, sink).await;

        for (role, text) in [("user", CONNECTED_PLACEHOLDER), ("assistant", greeting.as_str())] {
            if let Err(e) = self
                .storage
                .conversations
                .log_turn(role, text, Some(&self.session_id))
            {
                tracing::error!(session = %self.session_id, "Failed to log greeting: {e}");
            }
        }
    }

    /// Resolve the voice and stream synthesis chunks to the sink,
    /// observing the cancellation token before every send.
    async fn stream_speech(&self, text: &str, sink: &mut dyn ResponseSink) {
        let user = self
            .user_id
            .as_deref()
            .and_then(|id| self.storage.users.get(id).ok().flatten());
        let session_voice = self.overrides.lock().voice.clone();
        let voice_id = self.voices.resolve_for_session(
            user.as_ref(),
            session_voice.as_deref(),
            self.experience.as_ref(),
        );
        let reference = self.voices.reference_path(&voice_id);

        match self
            .facade
            .synthesize(text.to_string(), reference, self.cancel.clone())
            .await
        {
            Ok(mut rx) => {
                while let Some(chunk) = rx.recv().await {
                    if self.cancel.is_set() {
                        break;
                    }
                    if sink.audio_chunk(&chunk).await.is_err() {
                        self.cancel.set();
                        break;
                    }
                }
            }
            Err(e) => {
                tracing::error!(session = %self.session_id, "Synthesis error: {e}");
            }
        }

        if let Err(e) = sink.audio_end().await {
            tracing::debug!(session = %self.session_id, "Failed to send audio end: {e}");
        }
    }

    /// Fetch prior history and assemble the role-tagged message list.
    fn build_context(&self, user_text: &str) -> Vec<ChatMessage> {
        let history: Vec<ChatMessage> = self
            .storage
            .conversations
            .history(&self.session_id)
            .unwrap_or_else(|e| {
                tracing::error!(session = %self.session_id, "History read failed: {e}");
                Vec::new()
            })
            .into_iter()
            .filter_map(|entry| match entry.role.as_str() {
                "user" => Some(ChatMessage {
                    role: Role::User,
                    content: entry.transcript,
                }),
                "assistant" => Some(ChatMessage {
                    role: Role::Assistant,
                    content: entry.transcript,
                }),
                _ => None,
            })
            .collect();

        let user = self
            .user_id
            .as_deref()
            .and_then(|id| self.storage.users.get(id).ok().flatten());

        let mut constraints = behavior_constraints(
            self.experience_kind(),
            self.allow_paralinguistic,
            self.thinking_model,
        );
        if let Some(extra) = self.overrides.lock().system_prompt.as_deref() {
            if !extra.trim().is_empty() {
                constraints.push(' ');
                constraints.push_str(extra.trim());
            }
        }

        let system_prompt = build_system_prompt(
            self.experience.as_ref().map(|e| e.name.as_str()),
            self.experience.as_ref().map(|e| e.prompt.as_str()),
            user.as_ref(),
            &RuntimeContext::now(),
            Some(&constraints),
        );

        build_messages(&system_prompt, &history, user_text, self.max_history_messages)
    }
}
