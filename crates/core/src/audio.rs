//! PCM helpers for 16-bit little-endian mono audio.

/// Convert s16le PCM bytes to normalized f32 samples in [-1.0, 1.0].
///
/// A trailing odd byte is ignored; callers that stream partial chunks
/// should carry remainder bytes themselves.
pub fn pcm16_bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let sample = i16::from_le_bytes([pair[0], pair[1]]);
            sample as f32 / 32768.0
        })
        .collect()
}

/// Convert i16 samples to s16le bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

/// In-place gain boost with tanh soft-clipping on s16le PCM.
///
/// Applies `gain_db` of gain, then a tanh limiter so loud passages
/// saturate smoothly instead of folding. `ceiling` caps the post-limit
/// amplitude in [0.0, 1.0]. Odd trailing bytes are left untouched.
pub fn boost_limit_pcm16(pcm: &mut [u8], gain_db: f32, ceiling: f32) {
    if pcm.len() < 2 {
        return;
    }
    let gain = 10f32.powf(gain_db / 20.0);
    let ceiling = ceiling.clamp(0.0, 0.999);
    for pair in pcm.chunks_exact_mut(2) {
        let sample = i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0;
        let boosted = (sample * gain).tanh().clamp(-ceiling, ceiling);
        let out = (boosted * 32767.0) as i16;
        pair.copy_from_slice(&out.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_conversion() {
        let samples = vec![0i16, 100, -100, i16::MAX, i16::MIN];
        let bytes = pcm16_to_bytes(&samples);
        let floats = pcm16_bytes_to_f32(&bytes);
        assert_eq!(floats.len(), samples.len());
        assert!((floats[1] - 100.0 / 32768.0).abs() < 1e-6);
        assert!((floats[2] + 100.0 / 32768.0).abs() < 1e-6);
    }

    #[test]
    fn test_odd_trailing_byte_ignored() {
        let floats = pcm16_bytes_to_f32(&[0, 0, 7]);
        assert_eq!(floats.len(), 1);
    }

    #[test]
    fn test_boost_raises_quiet_signal() {
        let mut pcm = pcm16_to_bytes(&[1000, -1000]);
        boost_limit_pcm16(&mut pcm, 6.0, 0.95);
        let out = pcm16_bytes_to_f32(&pcm);
        assert!(out[0] > 1000.0 / 32768.0);
        assert!(out[1] < -1000.0 / 32768.0);
    }

    #[test]
    fn test_limiter_never_exceeds_ceiling() {
        let mut pcm = pcm16_to_bytes(&[i16::MAX; 32]);
        boost_limit_pcm16(&mut pcm, 12.0, 0.89);
        for s in pcm16_bytes_to_f32(&pcm) {
            assert!(s.abs() <= 0.89 + 1e-3);
        }
    }
}
