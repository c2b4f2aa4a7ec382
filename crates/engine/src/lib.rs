//! Inference engines and the facade that serializes access to them.
//!
//! The underlying speech-to-text, language-model and text-to-speech
//! engines own exclusive accelerator state and are not reentrant. Every
//! call path goes through [`InferenceFacade`], which holds a single
//! process-wide guard: one inference call runs at a time, across all
//! sessions.

pub mod facade;
pub mod stub;
pub mod traits;

pub use facade::{EngineSet, EngineState, InferenceFacade, SYNTH_CHUNK_SAMPLES};
pub use stub::{StubLanguageModel, StubSpeechToText, StubTextToSpeech};
pub use traits::{LanguageModel, SpeechToText, TextToSpeech};

use thiserror::Error;

/// Engine errors.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engines not ready")]
    NotReady,

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Engine task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
