//! Opus packetization for the embedded transport.
//!
//! An explicit encoder resource with scoped lifetime: open → push* →
//! flush → close. PCM bytes accumulate until whole frames are available;
//! encoded packets come back on each call as a ready queue.

use crate::PipelineError;
use audiopus::coder::Encoder;
use audiopus::{Application, Bitrate, Channels, SampleRate};

/// Output sample rate the device expects.
pub const OPUS_SAMPLE_RATE: u32 = 24_000;
/// Frame duration in milliseconds.
pub const OPUS_FRAME_MS: usize = 120;
/// Samples per frame.
pub const OPUS_FRAME_SAMPLES: usize = OPUS_SAMPLE_RATE as usize * OPUS_FRAME_MS / 1000;
/// Bytes of s16le PCM per frame.
pub const OPUS_FRAME_BYTES: usize = OPUS_FRAME_SAMPLES * 2;

const MAX_PACKET_BYTES: usize = 4000;

pub struct OpusPacketizer {
    encoder: Encoder,
    pending: Vec<u8>,
    closed: bool,
}

impl OpusPacketizer {
    pub fn new() -> Result<Self, PipelineError> {
        let mut encoder = Encoder::new(SampleRate::Hz24000, Channels::Mono, Application::Voip)
            .map_err(|e| PipelineError::Encoder(e.to_string()))?;
        encoder
            .set_bitrate(Bitrate::BitsPerSecond(24_000))
            .map_err(|e| PipelineError::Encoder(e.to_string()))?;
        Ok(Self {
            encoder,
            pending: Vec::new(),
            closed: false,
        })
    }

    /// Buffer PCM bytes and encode every complete frame. Returns the
    /// packets ready to send, in order.
    pub fn push(&mut self, pcm: &[u8]) -> Vec<Vec<u8>> {
        if self.closed || pcm.is_empty() {
            return Vec::new();
        }
        self.pending.extend_from_slice(pcm);

        let mut packets = Vec::new();
        while self.pending.len() >= OPUS_FRAME_BYTES {
            let rest = self.pending.split_off(OPUS_FRAME_BYTES);
            let frame = std::mem::replace(&mut self.pending, rest);
            match self.encode_frame(&frame) {
                Ok(packet) => packets.push(packet),
                Err(e) => tracing::warn!("Opus encode failed: {e}"),
            }
        }
        packets
    }

    /// Flush remaining audio. With `pad_final_frame`, a trailing partial
    /// frame is zero-padded and encoded; otherwise it is dropped.
    pub fn flush(&mut self, pad_final_frame: bool) -> Vec<Vec<u8>> {
        if self.closed {
            return Vec::new();
        }
        let mut packets = Vec::new();
        if !self.pending.is_empty() && pad_final_frame {
            let mut frame = std::mem::take(&mut self.pending);
            frame.resize(OPUS_FRAME_BYTES, 0);
            match self.encode_frame(&frame) {
                Ok(packet) => packets.push(packet),
                Err(e) => tracing::warn!("Opus encode failed: {e}"),
            }
        } else {
            self.pending.clear();
        }
        packets
    }

    /// Bytes buffered toward the next frame.
    pub fn buffered_bytes(&self) -> usize {
        self.pending.len()
    }

    /// Mark closed; later pushes are ignored.
    pub fn close(&mut self) {
        self.closed = true;
        self.pending.clear();
    }

    fn encode_frame(&mut self, frame: &[u8]) -> Result<Vec<u8>, PipelineError> {
        let samples: Vec<i16> = frame
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        let mut output = vec![0u8; MAX_PACKET_BYTES];
        let encoded_len = self
            .encoder
            .encode(&samples, &mut output)
            .map_err(|e| PipelineError::Encoder(e.to_string()))?;
        output.truncate(encoded_len);
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_emits_one_packet_per_frame() {
        let mut packetizer = OpusPacketizer::new().unwrap();
        let packets = packetizer.push(&vec![0u8; OPUS_FRAME_BYTES * 2]);
        assert_eq!(packets.len(), 2);
        assert!(packets.iter().all(|p| !p.is_empty()));
        assert_eq!(packetizer.buffered_bytes(), 0);
    }

    #[test]
    fn test_partial_frame_buffers_until_complete() {
        let mut packetizer = OpusPacketizer::new().unwrap();
        assert!(packetizer.push(&vec![0u8; OPUS_FRAME_BYTES / 2]).is_empty());
        assert_eq!(packetizer.buffered_bytes(), OPUS_FRAME_BYTES / 2);

        let packets = packetizer.push(&vec![0u8; OPUS_FRAME_BYTES / 2]);
        assert_eq!(packets.len(), 1);
    }

    #[test]
    fn test_flush_pads_final_frame() {
        let mut packetizer = OpusPacketizer::new().unwrap();
        packetizer.push(&vec![0u8; 100]);
        let packets = packetizer.flush(true);
        assert_eq!(packets.len(), 1);
        assert_eq!(packetizer.buffered_bytes(), 0);
    }

    #[test]
    fn test_flush_without_padding_drops_partial() {
        let mut packetizer = OpusPacketizer::new().unwrap();
        packetizer.push(&vec![0u8; 100]);
        assert!(packetizer.flush(false).is_empty());
        assert_eq!(packetizer.buffered_bytes(), 0);
    }

    #[test]
    fn test_closed_ignores_pushes() {
        let mut packetizer = OpusPacketizer::new().unwrap();
        packetizer.close();
        assert!(packetizer.push(&vec![0u8; OPUS_FRAME_BYTES]).is_empty());
    }
}
