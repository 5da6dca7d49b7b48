// Tests for the PCM16 codec and its base64 wire form

use anyhow::Result;
use helios_voice::audio::{
    decode_pcm16_to_f32, decode_wire_audio, encode_f32_to_pcm16, from_wire_text, pcm_mime_type,
    to_wire_text, CodecError, EncodedChunk,
};

/// Worst case for asymmetric scaling plus truncation toward zero
const ROUND_TRIP_TOLERANCE: f32 = 2.0 / 32768.0;

#[test]
fn test_round_trip_stays_within_quantization_bound() -> Result<()> {
    let samples: Vec<f32> = (0..=2000).map(|i| -1.0 + i as f32 / 1000.0).collect();

    let bytes = encode_f32_to_pcm16(&samples);
    assert_eq!(bytes.len(), samples.len() * 2);

    let decoded = decode_pcm16_to_f32(&bytes, 24000)?;
    assert_eq!(decoded.samples.len(), samples.len());

    for (original, restored) in samples.iter().zip(&decoded.samples) {
        assert!(
            (original - restored).abs() <= ROUND_TRIP_TOLERANCE,
            "{} came back as {}",
            original,
            restored
        );
    }

    Ok(())
}

#[test]
fn test_out_of_range_samples_are_clamped() -> Result<()> {
    let bytes = encode_f32_to_pcm16(&[4.0, -7.5]);
    let decoded = decode_pcm16_to_f32(&bytes, 24000)?;

    assert!((decoded.samples[0] - 32767.0 / 32768.0).abs() < f32::EPSILON);
    assert_eq!(decoded.samples[1], -1.0);
    Ok(())
}

#[test]
fn test_odd_byte_count_is_rejected() {
    let result = decode_pcm16_to_f32(&[0, 1, 2], 24000);
    assert_eq!(result.unwrap_err(), CodecError::TruncatedSample(3));
}

#[test]
fn test_wire_text_round_trip() -> Result<()> {
    let bytes: Vec<u8> = (0..=255).collect();
    assert_eq!(from_wire_text(&to_wire_text(&bytes))?, bytes);
    assert_eq!(from_wire_text("")?, Vec::<u8>::new());
    Ok(())
}

#[test]
fn test_corrupt_wire_text_is_rejected() {
    assert!(matches!(
        from_wire_text("not base64!"),
        Err(CodecError::InvalidWireText(_))
    ));
}

#[test]
fn test_buffer_duration_follows_sample_rate() -> Result<()> {
    let chunk = EncodedChunk::from_samples(&vec![0.0; 12000], 24000);
    let buffer = decode_wire_audio(chunk.wire_text(), 24000)?;

    assert_eq!(buffer.samples.len(), 12000);
    assert!((buffer.duration() - 0.5).abs() < 1e-9);
    assert_eq!(chunk.mime_type(), pcm_mime_type(24000));
    assert_eq!(chunk.mime_type(), "audio/pcm;rate=24000");
    Ok(())
}
