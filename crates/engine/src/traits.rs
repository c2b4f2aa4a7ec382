//! Capability contracts for the inference engines.
//!
//! Implementations are blocking — they run heavy compute — and are
//! always invoked from worker threads by the facade, never on the event
//! loop.

use crate::Result;
use hearth_core::ChatMessage;
use std::path::Path;

/// Speech-to-text over a complete utterance of s16le mono PCM.
pub trait SpeechToText: Send + Sync {
    /// Transcribe one utterance. Returns an empty string for silence;
    /// must not fail on empty input.
    fn transcribe(&self, pcm16: &[u8]) -> Result<String>;
}

/// Conversational text generation from a role-tagged message list.
pub trait LanguageModel: Send + Sync {
    /// Model reference this engine was loaded from.
    fn model_ref(&self) -> &str;

    fn generate(&self, messages: &[ChatMessage], max_tokens: usize) -> Result<String>;
}

/// Speech synthesis, streamed as s16le PCM.
pub trait TextToSpeech: Send + Sync {
    fn output_sample_rate(&self) -> u32;

    /// Synthesize `text`, pushing PCM byte chunks into `emit`. An `emit`
    /// return of `false` requests a stop; the engine must not call it
    /// again afterwards. `reference` optionally points at a voice
    /// reference WAV for cloning.
    fn synthesize(
        &self,
        text: &str,
        reference: Option<&Path>,
        emit: &mut dyn FnMut(Vec<u8>) -> bool,
    ) -> Result<()>;
}
