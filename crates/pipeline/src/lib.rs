//! The turn pipeline: speech segmentation, prompt/context assembly,
//! spoken-text sanitization, voice resolution, Opus framing and the
//! per-turn orchestrator.

pub mod opus;
pub mod prompt;
pub mod sanitize;
pub mod segmenter;
pub mod turn;
pub mod voice;

pub use opus::{OpusPacketizer, OPUS_FRAME_BYTES, OPUS_FRAME_SAMPLES};
pub use sanitize::sanitize_spoken_text;
pub use segmenter::{AudioSegmenter, SegmenterConfig, SpeechDetector, WebRtcDetector};
pub use turn::{ResponseSink, SessionOverrides, TurnController};
pub use voice::{resolve_voice_id, VoiceResolver};

use thiserror::Error;

/// Pipeline errors.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Voice activity detection error: {0}")]
    Vad(String),

    #[error("Audio encoder error: {0}")]
    Encoder(String),

    #[error("Transport closed")]
    TransportClosed,
}
