//! Voice-activity segmentation for the embedded transport.
//!
//! Consumes a continuous s16le mono PCM byte stream in fixed-duration
//! frames and emits finalized utterances once enough trailing silence
//! accumulates. Desktop clients segment on their side and send an
//! explicit end marker, so only device sessions run a segmenter.

use crate::PipelineError;
use webrtc_vad::{SampleRate, Vad, VadMode};

/// Frame classifier. Pluggable so tests can script verdicts.
pub trait SpeechDetector: Send {
    /// Classify one complete frame of s16le mono samples.
    fn is_speech(&mut self, frame: &[i16]) -> bool;
}

/// WebRTC VAD in its most aggressive mode.
pub struct WebRtcDetector {
    vad: Vad,
}

impl WebRtcDetector {
    pub fn new(sample_rate: u32) -> Result<Self, PipelineError> {
        let rate = match sample_rate {
            8_000 => SampleRate::Rate8kHz,
            16_000 => SampleRate::Rate16kHz,
            32_000 => SampleRate::Rate32kHz,
            48_000 => SampleRate::Rate48kHz,
            other => {
                return Err(PipelineError::Vad(format!(
                    "unsupported sample rate {other}"
                )))
            }
        };
        Ok(Self {
            vad: Vad::new_with_rate_and_mode(rate, VadMode::VeryAggressive),
        })
    }
}

// The inner VAD context holds a raw pointer with no thread affinity; the
// detector is owned by exactly one session task at a time.
unsafe impl Send for WebRtcDetector {}

impl SpeechDetector for WebRtcDetector {
    fn is_speech(&mut self, frame: &[i16]) -> bool {
        self.vad.is_voice_segment(frame).unwrap_or(false)
    }
}

/// Segmenter configuration.
#[derive(Debug, Clone)]
pub struct SegmenterConfig {
    pub sample_rate: u32,
    pub frame_duration_ms: u32,
    /// Trailing silence that finalizes an utterance.
    pub silence_duration_secs: f32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_duration_ms: 30,
            silence_duration_secs: 1.5,
        }
    }
}

impl SegmenterConfig {
    fn frame_bytes(&self) -> usize {
        (self.sample_rate as usize * self.frame_duration_ms as usize / 1000) * 2
    }

    fn silence_frame_limit(&self) -> u32 {
        (self.silence_duration_secs / (self.frame_duration_ms as f32 / 1000.0)) as u32
    }
}

/// Speech segmentation state machine.
///
/// idle → speaking on the first speech frame; while speaking, every
/// frame is accumulated and the silence run counter tracks consecutive
/// non-speech frames; once the run exceeds the configured limit the
/// accumulation is emitted as one utterance and the machine returns to
/// idle.
pub struct AudioSegmenter {
    config: SegmenterConfig,
    detector: Box<dyn SpeechDetector>,
    /// Raw bytes not yet forming a whole frame.
    pending: Vec<u8>,
    /// Accumulated utterance bytes.
    speech: Vec<u8>,
    is_speaking: bool,
    silence_run: u32,
}

impl AudioSegmenter {
    pub fn new(config: SegmenterConfig, detector: Box<dyn SpeechDetector>) -> Self {
        Self {
            config,
            detector,
            pending: Vec::new(),
            speech: Vec::new(),
            is_speaking: false,
            silence_run: 0,
        }
    }

    /// Segmenter with the production WebRTC detector.
    pub fn with_vad(config: SegmenterConfig) -> Result<Self, PipelineError> {
        let detector = WebRtcDetector::new(config.sample_rate)?;
        Ok(Self::new(config, Box::new(detector)))
    }

    pub fn is_speaking(&self) -> bool {
        self.is_speaking
    }

    /// Feed arbitrary-size byte chunks; returns utterances finalized by
    /// silence, in order. Remainder bytes that do not complete a frame
    /// are carried to the next call.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(bytes);
        let frame_bytes = self.config.frame_bytes();
        let limit = self.config.silence_frame_limit();
        let mut finalized = Vec::new();

        while self.pending.len() >= frame_bytes {
            let rest = self.pending.split_off(frame_bytes);
            let frame = std::mem::replace(&mut self.pending, rest);
            let samples: Vec<i16> = frame
                .chunks_exact(2)
                .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                .collect();
            let is_speech = self.detector.is_speech(&samples);

            if is_speech {
                if !self.is_speaking {
                    self.is_speaking = true;
                    tracing::debug!("Speech started");
                }
                self.speech.extend_from_slice(&frame);
                self.silence_run = 0;
            } else if self.is_speaking {
                self.speech.extend_from_slice(&frame);
                self.silence_run += 1;
                if self.silence_run > limit {
                    tracing::debug!("Speech ended after silence window");
                    finalized.push(self.take_utterance());
                }
            }
        }
        finalized
    }

    /// Out-of-band end-of-speech: emit whatever accumulated, if anything.
    pub fn finalize(&mut self) -> Option<Vec<u8>> {
        if self.speech.is_empty() {
            return None;
        }
        Some(self.take_utterance())
    }

    /// Discard accumulation and buffered bytes without emitting.
    pub fn interrupt(&mut self) {
        self.speech.clear();
        self.pending.clear();
        self.is_speaking = false;
        self.silence_run = 0;
    }

    fn take_utterance(&mut self) -> Vec<u8> {
        self.is_speaking = false;
        self.silence_run = 0;
        std::mem::take(&mut self.speech)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scripted detector: pops verdicts front-to-back, then silence.
    struct Scripted(Vec<bool>);

    impl SpeechDetector for Scripted {
        fn is_speech(&mut self, _frame: &[i16]) -> bool {
            if self.0.is_empty() {
                false
            } else {
                self.0.remove(0)
            }
        }
    }

    fn segmenter(verdicts: Vec<bool>, silence_secs: f32) -> AudioSegmenter {
        AudioSegmenter::new(
            SegmenterConfig {
                sample_rate: 16_000,
                frame_duration_ms: 30,
                silence_duration_secs: silence_secs,
            },
            Box::new(Scripted(verdicts)),
        )
    }

    const FRAME: usize = 960; // 30 ms at 16 kHz, 2 bytes/sample

    #[test]
    fn test_silence_only_never_finalizes() {
        let mut seg = segmenter(vec![false; 200], 0.09); // limit = 3 frames
        let out = seg.push(&vec![0u8; FRAME * 200]);
        assert!(out.is_empty());
        assert!(!seg.is_speaking());
        assert!(seg.finalize().is_none());
    }

    #[test]
    fn test_finalizes_after_silence_window() {
        // 2 speech frames then silence; limit 3 ⇒ the 4th consecutive
        // silence frame finalizes.
        let mut verdicts = vec![true, true];
        verdicts.extend(vec![false; 10]);
        let mut seg = segmenter(verdicts, 0.09);

        let out = seg.push(&vec![0u8; FRAME * 5]); // 2 speech + 3 silence: not yet
        assert!(out.is_empty());
        assert!(seg.is_speaking());

        let out = seg.push(&vec![0u8; FRAME]); // 4th silence frame
        assert_eq!(out.len(), 1);
        // Utterance carries the speech frames plus the trailing silence.
        assert_eq!(out[0].len(), FRAME * 6);
        assert!(!seg.is_speaking());
    }

    #[test]
    fn test_speech_resets_silence_run() {
        // speech, 3 silence, speech again, 3 silence: never exceeds the
        // limit of 3.
        let verdicts = vec![
            true, false, false, false, true, false, false, false,
        ];
        let mut seg = segmenter(verdicts, 0.09);
        let out = seg.push(&vec![0u8; FRAME * 8]);
        assert!(out.is_empty());
        assert!(seg.is_speaking());
    }

    #[test]
    fn test_manual_finalize_requires_accumulation() {
        let mut seg = segmenter(vec![true, false], 1.5);
        assert!(seg.finalize().is_none());

        seg.push(&vec![0u8; FRAME * 2]);
        let utterance = seg.finalize().expect("accumulated frames");
        assert_eq!(utterance.len(), FRAME * 2);
        assert!(seg.finalize().is_none());
    }

    #[test]
    fn test_interrupt_discards_without_emitting() {
        let mut seg = segmenter(vec![true, true], 1.5);
        seg.push(&vec![0u8; FRAME * 2]);
        assert!(seg.is_speaking());
        seg.interrupt();
        assert!(!seg.is_speaking());
        assert!(seg.finalize().is_none());
    }

    #[test]
    fn test_partial_chunks_carry_remainder() {
        let mut seg = segmenter(vec![true; 4], 1.5);
        // Three half-frames: only one whole frame classified so far.
        seg.push(&vec![0u8; FRAME / 2]);
        seg.push(&vec![0u8; FRAME / 2]);
        seg.push(&vec![0u8; FRAME / 2]);
        let utterance = seg.finalize().expect("one whole frame accumulated");
        assert_eq!(utterance.len(), FRAME);
    }

    #[test]
    fn test_multiple_utterances_in_one_push() {
        // speech, 4 silence, speech, 4 silence with limit 3.
        let verdicts = vec![
            true, false, false, false, false, true, false, false, false, false,
        ];
        let mut seg = segmenter(verdicts, 0.09);
        let out = seg.push(&vec![0u8; FRAME * 10]);
        assert_eq!(out.len(), 2);
    }
}
