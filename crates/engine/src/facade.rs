//! Single-owner wrapper around the inference engines.

use crate::traits::{LanguageModel, SpeechToText, TextToSpeech};
use crate::{EngineError, Result};
use hearth_core::{CancelToken, ChatMessage};
use parking_lot::RwLock;
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, Mutex};

/// Samples per synthesis chunk: 120 ms at 24 kHz. Chunks are re-sliced
/// to this bound so downstream framing stays within transport
/// message-size limits.
pub const SYNTH_CHUNK_SAMPLES: usize = 2880;
const SYNTH_CHUNK_BYTES: usize = SYNTH_CHUNK_SAMPLES * 2;

/// Facade lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineState {
    /// Models are still loading; inference calls fail fast.
    Loading,
    Ready,
    /// Loading failed; the server stays up but sessions are refused.
    Failed(String),
}

/// The engines, swapped as a unit under the facade guard.
pub struct EngineSet {
    pub stt: Arc<dyn SpeechToText>,
    pub llm: Arc<dyn LanguageModel>,
    pub tts: Arc<dyn TextToSpeech>,
}

/// Serialized entry point for all inference.
///
/// One `tokio::sync::Mutex` guards the engine set; every transcribe,
/// generate and synthesize call holds it for the full duration of the
/// underlying compute, so a long generation in one session delays every
/// other session's inference. There is deliberately no per-call timeout:
/// a hung engine call stalls the guard indefinitely.
pub struct InferenceFacade {
    state: RwLock<EngineState>,
    engines: Arc<Mutex<Option<EngineSet>>>,
    output_sample_rate: RwLock<u32>,
}

impl InferenceFacade {
    /// Create a facade with no engines installed yet.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(EngineState::Loading),
            engines: Arc::new(Mutex::new(None)),
            output_sample_rate: RwLock::new(24_000),
        }
    }

    /// Install the loaded engines and mark the facade ready.
    pub async fn install(&self, engines: EngineSet) {
        *self.output_sample_rate.write() = engines.tts.output_sample_rate();
        *self.engines.lock().await = Some(engines);
        *self.state.write() = EngineState::Ready;
        tracing::info!("Inference engines installed");
    }

    /// Record a failed initialization.
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::error!("Engine initialization failed: {reason}");
        *self.state.write() = EngineState::Failed(reason);
    }

    pub fn state(&self) -> EngineState {
        self.state.read().clone()
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.state(), EngineState::Ready)
    }

    pub fn output_sample_rate(&self) -> u32 {
        *self.output_sample_rate.read()
    }

    /// Model reference of the active language model.
    pub async fn model_ref(&self) -> Option<String> {
        let engines = self.engines.lock().await;
        engines.as_ref().map(|e| e.llm.model_ref().to_string())
    }

    /// Transcribe one utterance of s16le mono PCM. Silence and empty
    /// input yield an empty string, never an error.
    pub async fn transcribe(&self, pcm16: Vec<u8>) -> Result<String> {
        if pcm16.is_empty() {
            return Ok(String::new());
        }
        let guard = self.engines.lock().await;
        let stt = guard.as_ref().ok_or(EngineError::NotReady)?.stt.clone();
        let text = tokio::task::spawn_blocking(move || stt.transcribe(&pcm16))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))??;
        Ok(text.trim().to_string())
    }

    /// Generate a reply from a role-tagged message list.
    pub async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        max_tokens: usize,
        strip_reasoning: bool,
    ) -> Result<String> {
        let guard = self.engines.lock().await;
        let llm = guard.as_ref().ok_or(EngineError::NotReady)?.llm.clone();
        let text = tokio::task::spawn_blocking(move || llm.generate(&messages, max_tokens))
            .await
            .map_err(|e| EngineError::Task(e.to_string()))??;
        let text = if strip_reasoning {
            strip_reasoning_traces(&text)
        } else {
            text.trim().to_string()
        };
        Ok(text)
    }

    /// Stream synthesized speech as bounded PCM chunks.
    ///
    /// The returned receiver yields s16le chunks of at most
    /// [`SYNTH_CHUNK_SAMPLES`] samples. The facade guard is held by the
    /// producing task until the engine finishes or stops; `cancel` is
    /// checked before every chunk, so a cancellation takes effect within
    /// one chunk. Dropping the receiver also stops the stream.
    pub async fn synthesize(
        &self,
        text: String,
        reference: Option<PathBuf>,
        cancel: CancelToken,
    ) -> Result<mpsc::Receiver<Vec<u8>>> {
        if !self.is_ready() {
            return Err(EngineError::NotReady);
        }
        let (tx, rx) = mpsc::channel::<Vec<u8>>(8);
        let engines = self.engines.clone();

        tokio::spawn(async move {
            let guard = engines.lock().await;
            let Some(set) = guard.as_ref() else {
                return;
            };
            let tts = set.tts.clone();
            let result = tokio::task::spawn_blocking(move || {
                let mut pending: Vec<u8> = Vec::new();
                let mut stopped = false;
                let mut forward = |chunk: Vec<u8>| -> bool {
                    if cancel.is_set() {
                        return false;
                    }
                    pending.extend_from_slice(&chunk);
                    while pending.len() >= SYNTH_CHUNK_BYTES {
                        let rest = pending.split_off(SYNTH_CHUNK_BYTES);
                        let piece = std::mem::replace(&mut pending, rest);
                        if cancel.is_set() || tx.blocking_send(piece).is_err() {
                            return false;
                        }
                    }
                    true
                };
                let res = tts.synthesize(&text, reference.as_deref(), &mut |chunk| {
                    let keep_going = forward(chunk);
                    stopped = !keep_going;
                    keep_going
                });
                // Flush the sub-chunk tail unless the stream was cut short.
                if !stopped && !pending.is_empty() && !cancel.is_set() {
                    let _ = tx.blocking_send(pending);
                }
                res
            })
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!("Synthesis error: {e}"),
                Err(e) => tracing::error!("Synthesis task failed: {e}"),
            }
        });

        Ok(rx)
    }

    /// Hot-swap the language model. The swap happens under the facade
    /// guard so no concurrent call observes a half-swapped engine set;
    /// the previous model is released once the swap completes.
    pub async fn switch_model(&self, llm: Arc<dyn LanguageModel>) -> Result<()> {
        let mut guard = self.engines.lock().await;
        let set = guard.as_mut().ok_or(EngineError::NotReady)?;
        let old = std::mem::replace(&mut set.llm, llm);
        drop(old);
        tracing::info!(model = %set.llm.model_ref(), "Language model switched");
        Ok(())
    }
}

impl Default for InferenceFacade {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove reasoning-trace spans and stray delimiter tags from model
/// output.
pub fn strip_reasoning_traces(text: &str) -> String {
    static SPAN: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    let span = SPAN.get_or_init(|| Regex::new(r"(?is)<think>.*?</think>").expect("static regex"));
    let tag = TAG.get_or_init(|| Regex::new(r"(?i)</?think>").expect("static regex"));
    let cleaned = span.replace_all(text, "");
    let cleaned = tag.replace_all(&cleaned, "");
    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::{StubLanguageModel, StubSpeechToText, StubTextToSpeech};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stub_set() -> EngineSet {
        EngineSet {
            stt: Arc::new(StubSpeechToText::new("hello there")),
            llm: Arc::new(StubLanguageModel::new("stub/model-a", "Nice to meet you.")),
            tts: Arc::new(StubTextToSpeech::new(24_000)),
        }
    }

    async fn ready_facade() -> InferenceFacade {
        let facade = InferenceFacade::new();
        facade.install(stub_set()).await;
        facade
    }

    #[tokio::test]
    async fn test_not_ready_rejects_calls() {
        let facade = InferenceFacade::new();
        assert_eq!(facade.state(), EngineState::Loading);
        let err = facade
            .generate(vec![ChatMessage::user("hi")], 64, false)
            .await;
        assert!(matches!(err, Err(EngineError::NotReady)));
    }

    #[tokio::test]
    async fn test_transcribe_empty_input_is_empty_string() {
        let facade = ready_facade().await;
        assert_eq!(facade.transcribe(Vec::new()).await.unwrap(), "");
        assert_eq!(
            facade.transcribe(vec![0u8; 320]).await.unwrap(),
            "hello there"
        );
    }

    #[tokio::test]
    async fn test_generate_strips_reasoning() {
        let facade = InferenceFacade::new();
        let mut set = stub_set();
        set.llm = Arc::new(StubLanguageModel::new(
            "stub/thinking",
            "<think>internal trace</think>Hello!",
        ));
        facade.install(set).await;

        let raw = facade
            .generate(vec![ChatMessage::user("hi")], 64, false)
            .await
            .unwrap();
        assert!(raw.contains("<think>"));

        let stripped = facade
            .generate(vec![ChatMessage::user("hi")], 64, true)
            .await
            .unwrap();
        assert_eq!(stripped, "Hello!");
    }

    #[tokio::test]
    async fn test_inference_is_mutually_exclusive() {
        struct CountingLlm {
            active: Arc<AtomicUsize>,
            overlap: Arc<AtomicUsize>,
        }
        impl LanguageModel for CountingLlm {
            fn model_ref(&self) -> &str {
                "stub/counting"
            }
            fn generate(&self, _m: &[ChatMessage], _t: usize) -> Result<String> {
                let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                if now > 1 {
                    self.overlap.fetch_add(1, Ordering::SeqCst);
                }
                std::thread::sleep(std::time::Duration::from_millis(25));
                self.active.fetch_sub(1, Ordering::SeqCst);
                Ok("ok".to_string())
            }
        }

        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let facade = Arc::new(InferenceFacade::new());
        let mut set = stub_set();
        set.llm = Arc::new(CountingLlm {
            active: active.clone(),
            overlap: overlap.clone(),
        });
        facade.install(set).await;

        let mut handles = Vec::new();
        for _ in 0..4 {
            let facade = facade.clone();
            handles.push(tokio::spawn(async move {
                facade
                    .generate(vec![ChatMessage::user("hi")], 8, false)
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_synthesize_chunks_are_bounded() {
        let facade = ready_facade().await;
        let mut rx = facade
            .synthesize("Hello world, this is a reply.".to_string(), None, CancelToken::new())
            .await
            .unwrap();
        let mut total = 0usize;
        while let Some(chunk) = rx.recv().await {
            assert!(chunk.len() <= SYNTH_CHUNK_SAMPLES * 2);
            total += chunk.len();
        }
        assert!(total > 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start_emits_nothing() {
        let facade = ready_facade().await;
        let cancel = CancelToken::new();
        cancel.set();
        let mut rx = facade
            .synthesize("Hello.".to_string(), None, cancel)
            .await
            .unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_stops_early() {
        let facade = InferenceFacade::new();
        let mut set = stub_set();
        // Long output: far more chunks than the channel can buffer.
        set.tts = Arc::new(StubTextToSpeech::new(24_000).with_chunks(100));
        facade.install(set).await;

        let cancel = CancelToken::new();
        let mut rx = facade
            .synthesize("long".to_string(), None, cancel.clone())
            .await
            .unwrap();

        let first = rx.recv().await;
        assert!(first.is_some());
        cancel.set();

        let mut rest = 0usize;
        while rx.recv().await.is_some() {
            rest += 1;
        }
        // Only chunks already buffered before the flag was observed may
        // still drain; the producer stops within one chunk.
        assert!(rest < 100, "expected early stop, drained {rest} chunks");
    }

    #[tokio::test]
    async fn test_switch_model_swaps_replies() {
        let facade = ready_facade().await;
        let before = facade
            .generate(vec![ChatMessage::user("hi")], 8, false)
            .await
            .unwrap();
        assert_eq!(before, "Nice to meet you.");

        facade
            .switch_model(Arc::new(StubLanguageModel::new("stub/model-b", "Swapped.")))
            .await
            .unwrap();
        assert_eq!(facade.model_ref().await.as_deref(), Some("stub/model-b"));

        let after = facade
            .generate(vec![ChatMessage::user("hi")], 8, false)
            .await
            .unwrap();
        assert_eq!(after, "Swapped.");
    }

    #[test]
    fn test_strip_reasoning_traces() {
        assert_eq!(
            strip_reasoning_traces("<think>a\nb</think> answer"),
            "answer"
        );
        assert_eq!(strip_reasoning_traces("no tags"), "no tags");
        assert_eq!(strip_reasoning_traces("dangling </think> tail"), "dangling  tail".trim());
    }
}
