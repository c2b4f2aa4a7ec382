//! Deterministic in-process engines.
//!
//! Used by the test suites and by model-less runs: they honor every
//! contract in [`crate::traits`] (silence handling, chunked synthesis,
//! cooperative stop) without loading any model.

use crate::traits::{LanguageModel, SpeechToText, TextToSpeech};
use crate::Result;
use hearth_core::ChatMessage;
use std::path::Path;

/// Fixed-transcript speech recognizer.
pub struct StubSpeechToText {
    transcript: String,
}

impl StubSpeechToText {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
        }
    }
}

impl SpeechToText for StubSpeechToText {
    fn transcribe(&self, pcm16: &[u8]) -> Result<String> {
        if pcm16.len() < 2 {
            return Ok(String::new());
        }
        Ok(self.transcript.clone())
    }
}

/// Fixed-reply language model.
pub struct StubLanguageModel {
    model_ref: String,
    reply: String,
}

impl StubLanguageModel {
    pub fn new(model_ref: impl Into<String>, reply: impl Into<String>) -> Self {
        Self {
            model_ref: model_ref.into(),
            reply: reply.into(),
        }
    }
}

impl LanguageModel for StubLanguageModel {
    fn model_ref(&self) -> &str {
        &self.model_ref
    }

    fn generate(&self, _messages: &[ChatMessage], _max_tokens: usize) -> Result<String> {
        Ok(self.reply.clone())
    }
}

/// Silence synthesizer emitting 120 ms chunks.
pub struct StubTextToSpeech {
    sample_rate: u32,
    fixed_chunks: Option<usize>,
}

impl StubTextToSpeech {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            fixed_chunks: None,
        }
    }

    /// Emit exactly `chunks` chunks regardless of text length.
    pub fn with_chunks(mut self, chunks: usize) -> Self {
        self.fixed_chunks = Some(chunks);
        self
    }
}

impl TextToSpeech for StubTextToSpeech {
    fn output_sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn synthesize(
        &self,
        text: &str,
        _reference: Option<&Path>,
        emit: &mut dyn FnMut(Vec<u8>) -> bool,
    ) -> Result<()> {
        // Roughly one chunk per ten characters of text.
        let chunks = self
            .fixed_chunks
            .unwrap_or_else(|| (text.len() / 10).max(1));
        let chunk = vec![0u8; 2880 * 2];
        for _ in 0..chunks {
            if !emit(chunk.clone()) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stub_stt_silence() {
        let stt = StubSpeechToText::new("hi");
        assert_eq!(stt.transcribe(&[]).unwrap(), "");
        assert_eq!(stt.transcribe(&[0, 0]).unwrap(), "hi");
    }

    #[test]
    fn test_stub_tts_respects_stop() {
        let tts = StubTextToSpeech::new(24_000).with_chunks(10);
        let mut seen = 0usize;
        tts.synthesize("x", None, &mut |_chunk| {
            seen += 1;
            seen < 3
        })
        .unwrap();
        assert_eq!(seen, 3);
    }
}
