// PCM codec for the assistant wire format
//
// Microphone audio travels as little-endian 16-bit signed PCM wrapped in
// standard base64. Replies come back in the same format and are decoded to
// normalized f32 samples for the playback scheduler.

use base64::Engine;
use thiserror::Error;

/// Sample rate of PCM audio on the wire (both directions)
pub const WIRE_SAMPLE_RATE: u32 = 24000;

/// Errors raised while decoding audio received from the wire
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// PCM payload ended in the middle of a 16-bit sample
    #[error("truncated PCM sample: payload has odd length {0}")]
    TruncatedSample(usize),

    /// Wire text is not valid base64
    #[error("invalid wire encoding: {0}")]
    InvalidWireText(String),
}

/// Decoded mono audio ready for scheduling
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    /// Normalized samples in [-1.0, 1.0)
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioBuffer {
    /// Playback duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Encoded audio chunk, immutable once produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    pcm: Vec<u8>,
    sample_rate: u32,
    wire: String,
}

impl EncodedChunk {
    /// Encode float samples into a chunk carrying both PCM and wire text
    pub fn from_samples(samples: &[f32], sample_rate: u32) -> Self {
        let pcm = encode_f32_to_pcm16(samples);
        let wire = to_wire_text(&pcm);
        Self {
            pcm,
            sample_rate,
            wire,
        }
    }

    pub fn pcm(&self) -> &[u8] {
        &self.pcm
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Base64 text for transport
    pub fn wire_text(&self) -> &str {
        &self.wire
    }

    /// MIME type announced alongside the chunk
    pub fn mime_type(&self) -> String {
        pcm_mime_type(self.sample_rate)
    }

    /// Consume the chunk, yielding the wire text
    pub fn into_wire_text(self) -> String {
        self.wire
    }
}

/// MIME type for raw PCM at the given rate, e.g. `audio/pcm;rate=24000`
pub fn pcm_mime_type(sample_rate: u32) -> String {
    format!("audio/pcm;rate={}", sample_rate)
}

/// Convert float samples to little-endian 16-bit PCM
///
/// Samples are clamped to [-1, 1]; negatives scale by 32768 and
/// non-negatives by 32767 so both extremes map onto the i16 range.
pub fn encode_f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        let value = if s < 0.0 {
            (s * 32768.0) as i16
        } else {
            (s * 32767.0) as i16
        };
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Convert little-endian 16-bit PCM back to normalized float samples
pub fn decode_pcm16_to_f32(bytes: &[u8], sample_rate: u32) -> Result<AudioBuffer, CodecError> {
    if bytes.len() % 2 != 0 {
        return Err(CodecError::TruncatedSample(bytes.len()));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();

    Ok(AudioBuffer {
        samples,
        sample_rate,
    })
}

/// Base64-encode bytes for transport
pub fn to_wire_text(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Decode base64 wire text back to bytes
pub fn from_wire_text(text: &str) -> Result<Vec<u8>, CodecError> {
    base64::engine::general_purpose::STANDARD
        .decode(text)
        .map_err(|e| CodecError::InvalidWireText(e.to_string()))
}

/// Decode a wire-encoded audio fragment straight to an [`AudioBuffer`]
pub fn decode_wire_audio(text: &str, sample_rate: u32) -> Result<AudioBuffer, CodecError> {
    let bytes = from_wire_text(text)?;
    decode_pcm16_to_f32(&bytes, sample_rate)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extremes_map_to_i16_range() {
        let bytes = encode_f32_to_pcm16(&[-1.0, 1.0, 0.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MIN);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
        assert_eq!(i16::from_le_bytes([bytes[4], bytes[5]]), 0);
    }

    #[test]
    fn test_out_of_range_samples_are_clamped() {
        let bytes = encode_f32_to_pcm16(&[-3.5, 7.0]);
        assert_eq!(i16::from_le_bytes([bytes[0], bytes[1]]), i16::MIN);
        assert_eq!(i16::from_le_bytes([bytes[2], bytes[3]]), i16::MAX);
    }

    #[test]
    fn test_odd_length_rejected() {
        let err = decode_pcm16_to_f32(&[0, 1, 2], WIRE_SAMPLE_RATE).unwrap_err();
        assert_eq!(err, CodecError::TruncatedSample(3));
    }

    #[test]
    fn test_chunk_mime_type() {
        let chunk = EncodedChunk::from_samples(&[0.0; 4], WIRE_SAMPLE_RATE);
        assert_eq!(chunk.mime_type(), "audio/pcm;rate=24000");
        assert_eq!(chunk.pcm().len(), 8);
    }
}
