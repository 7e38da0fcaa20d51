//! PCM16 wire codec.
//!
//! The live session speaks little-endian signed 16-bit mono PCM in both
//! directions: 16 kHz upstream (microphone) and 24 kHz downstream (synthesized
//! speech). These functions are pure and stateless — safe to call from any
//! thread.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

/// Sample rate of audio arriving from the remote session (Hz).
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Sample rate of audio sent to the remote session (Hz).
pub const CAPTURE_SAMPLE_RATE: u32 = 16_000;

/// A contiguous block of normalized mono samples at a known sample rate.
///
/// Derived 1:1 from a raw PCM16 chunk; owned by the playback scheduler until
/// played or discarded.
#[derive(Debug, Clone)]
pub struct DecodedBuffer {
    /// Mono f32 samples in [-1.0, 1.0).
    pub samples: Vec<f32>,
    /// Channel count. Always 1 for the live session wire format.
    pub channels: u16,
    /// Sample rate in Hz (e.g. 16000, 24000).
    pub sample_rate: u32,
}

impl DecodedBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            channels: 1,
            sample_rate,
        }
    }

    /// Duration of this buffer in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Decode little-endian PCM16 bytes into normalized floats.
///
/// Each consecutive byte pair is an `i16`, normalized by `/ 32768`. A trailing
/// odd byte is dropped rather than failing the whole chunk.
pub fn decode_pcm16(bytes: &[u8], sample_rate: u32) -> DecodedBuffer {
    let mut samples = Vec::with_capacity(bytes.len() / 2);
    for pair in bytes.chunks_exact(2) {
        let value = i16::from_le_bytes([pair[0], pair[1]]);
        samples.push(f32::from(value) / 32768.0);
    }
    DecodedBuffer::new(samples, sample_rate)
}

/// Encode normalized floats as little-endian PCM16 bytes.
///
/// Samples are clamped to the i16 range with round-to-nearest, so a
/// decode → encode round trip reproduces the original bytes exactly.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let value = (sample * 32768.0).round().clamp(-32768.0, 32767.0) as i16;
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Encode samples as PCM16 and wrap in standard base64, ready for the
/// realtime input message payload.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    BASE64.encode(encode_pcm16(samples))
}

/// Decode a base64 PCM16 payload back into samples.
pub fn decode_pcm16_base64(data: &str, sample_rate: u32) -> Option<DecodedBuffer> {
    BASE64
        .decode(data)
        .ok()
        .map(|bytes| decode_pcm16(&bytes, sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn decodes_known_samples() {
        // 0x0000 = 0, 0x4000 = 16384 → 0.5, 0x8000 = -32768 → -1.0
        let bytes = [0x00, 0x00, 0x00, 0x40, 0x00, 0x80];
        let decoded = decode_pcm16(&bytes, PLAYBACK_SAMPLE_RATE);
        assert_eq!(decoded.samples.len(), 3);
        assert_abs_diff_eq!(decoded.samples[0], 0.0);
        assert_abs_diff_eq!(decoded.samples[1], 0.5);
        assert_abs_diff_eq!(decoded.samples[2], -1.0);
        assert_eq!(decoded.channels, 1);
        assert_eq!(decoded.sample_rate, PLAYBACK_SAMPLE_RATE);
    }

    #[test]
    fn trailing_odd_byte_is_dropped() {
        let bytes = [0x00, 0x40, 0x7f];
        let decoded = decode_pcm16(&bytes, PLAYBACK_SAMPLE_RATE);
        assert_eq!(decoded.samples.len(), 1);
        assert_abs_diff_eq!(decoded.samples[0], 0.5);
    }

    #[test]
    fn empty_input_decodes_to_empty_buffer() {
        let decoded = decode_pcm16(&[], PLAYBACK_SAMPLE_RATE);
        assert!(decoded.is_empty());
    }

    #[test]
    fn round_trip_reproduces_all_extremes() {
        let original: Vec<i16> = vec![i16::MIN, -1, 0, 1, 12_345, i16::MAX];
        let bytes: Vec<u8> = original
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();

        let decoded = decode_pcm16(&bytes, CAPTURE_SAMPLE_RATE);
        let re_encoded = encode_pcm16(&decoded.samples);

        for (pair, expected) in re_encoded.chunks_exact(2).zip(&original) {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            assert!(
                (i32::from(value) - i32::from(*expected)).abs() <= 1,
                "round trip drifted: {value} vs {expected}"
            );
        }
    }

    #[test]
    fn encode_clamps_out_of_range_samples() {
        let bytes = encode_pcm16(&[1.5, -1.5]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MIN);
    }

    #[test]
    fn base64_round_trip() {
        let samples = vec![0.0, 0.25, -0.25, 0.5];
        let encoded = encode_pcm16_base64(&samples);
        let decoded = decode_pcm16_base64(&encoded, CAPTURE_SAMPLE_RATE)
            .expect("valid base64 payload");
        assert_eq!(decoded.samples.len(), samples.len());
        for (got, want) in decoded.samples.iter().zip(&samples) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1.0 / 32768.0);
        }
    }

    #[test]
    fn duration_reflects_sample_rate() {
        let buffer = DecodedBuffer::new(vec![0.0; 24_000], PLAYBACK_SAMPLE_RATE);
        assert_abs_diff_eq!(buffer.duration_secs(), 1.0);
    }
}
