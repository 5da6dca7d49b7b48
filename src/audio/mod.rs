pub mod backend;
pub mod capture;
pub mod codec;
pub mod file;
pub mod microphone;
pub mod output;
pub mod playback;
pub mod resample;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioFrame, AudioSource, CaptureSource,
};
pub use capture::{CaptureGate, CapturePipeline, FrameSlicer, WireFormat, DEFAULT_FRAME_SIZE};
pub use codec::{
    decode_pcm16_to_f32, decode_wire_audio, encode_f32_to_pcm16, from_wire_text, pcm_mime_type,
    to_wire_text, AudioBuffer, CodecError, EncodedChunk, WIRE_SAMPLE_RATE,
};
pub use file::{AudioFile, FileBackend};
pub use microphone::MicrophoneBackend;
pub use output::{CpalOutput, NullOutput};
pub use playback::{
    EndedCallback, OutputDevice, PlaybackScheduler, PlaybackUnit, ScheduledUnit, UnitId,
};
pub use resample::{resample, StreamResampler};
