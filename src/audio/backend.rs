use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// Audio sample data from a capture device (f32, interleaved)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples in [-1.0, 1.0], interleaved when `channels > 1`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

impl AudioFrame {
    /// Average interleaved channels down to mono
    pub fn into_mono(self) -> AudioFrame {
        if self.channels <= 1 {
            return self;
        }

        let channels = self.channels as usize;
        let samples = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect();

        AudioFrame {
            samples,
            sample_rate: self.sample_rate,
            channels: 1,
            timestamp_ms: self.timestamp_ms,
        }
    }
}

/// Configuration for audio backend
///
/// Backends deliver frames in their native format; the capture pipeline
/// converts them to the wire format.
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Buffer size in milliseconds for file-fed backends
    pub buffer_duration_ms: u64,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            buffer_duration_ms: 100,
        }
    }
}

/// Audio capture backend trait
///
/// Implementations:
/// - Microphone: cpal default input device
/// - File: WAV file paced in real time (headless runs and testing)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames. Failing
    /// here means the input could not be acquired (denied or absent).
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing audio
    async fn stop(&mut self) -> Result<()>;

    /// Check if backend is currently capturing
    fn is_capturing(&self) -> bool;

    /// Get backend name for logging
    fn name(&self) -> &str;
}

/// Opens capture backends on demand
///
/// The session asks for a fresh backend every time it needs the
/// microphone; returning an error puts the session in text-only mode.
pub trait CaptureSource: Send + Sync {
    fn open(&self, config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>>;
}

/// Audio source type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default microphone input
    Microphone,
    /// WAV file input
    File(PathBuf),
    /// No capture at all (text-only)
    None,
}

impl AudioSource {
    /// Parse the `audio.input` config value
    pub fn from_setting(value: &str) -> Self {
        match value.trim() {
            "" | "none" | "off" => AudioSource::None,
            "microphone" | "mic" | "default" => AudioSource::Microphone,
            path => AudioSource::File(PathBuf::from(path)),
        }
    }
}

impl CaptureSource for AudioSource {
    fn open(&self, config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        AudioBackendFactory::create(self.clone(), config.clone())
    }
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend for the given source
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::Microphone => {
                let backend = super::microphone::MicrophoneBackend::new()?;
                Ok(Box::new(backend))
            }

            AudioSource::File(path) => {
                let backend = super::file::FileBackend::open(path, config)?;
                Ok(Box::new(backend))
            }

            AudioSource::None => {
                anyhow::bail!("Audio capture disabled by configuration")
            }
        }
    }
}
