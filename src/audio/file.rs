use anyhow::{bail, Context, Result};
use hound::{SampleFormat, WavReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use super::backend::{AudioBackend, AudioBackendConfig, AudioFrame};

/// A WAV file decoded to normalized float samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path).context("Failed to open WAV file")?;

        let spec = reader.spec();
        let samples: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Float, 32) => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (SampleFormat::Int, 16) => reader
                .into_samples::<i16>()
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<Result<Vec<_>, _>>()
                .context("Failed to read audio samples")?,
            (format, bits) => bail!("Unsupported WAV format: {:?} {}-bit", format, bits),
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Capture backend that replays a WAV file as if it were a microphone
///
/// Frames of `buffer_duration_ms` are emitted at real-time pace, so the
/// downstream cadence matches a live device.
pub struct FileBackend {
    path: PathBuf,
    config: AudioBackendConfig,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(path: impl Into<PathBuf>, config: AudioBackendConfig) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            bail!("Audio input file not found: {}", path.display());
        }

        Ok(Self {
            path,
            config,
            task: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.task.is_some() {
            bail!("Already capturing");
        }

        let audio = AudioFile::open(&self.path)?;
        let config = self.config.clone();
        let (tx, rx) = mpsc::channel(16);

        let channels = audio.channels.max(1) as usize;
        let frames_per_buffer =
            (audio.sample_rate as u64 * config.buffer_duration_ms / 1000).max(1) as usize;
        let interval = Duration::from_millis(config.buffer_duration_ms.max(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for (index, block) in audio.samples.chunks(frames_per_buffer * channels).enumerate() {
                ticker.tick().await;

                let frame = AudioFrame {
                    samples: block.to_vec(),
                    sample_rate: audio.sample_rate,
                    channels: audio.channels,
                    timestamp_ms: index as u64 * config.buffer_duration_ms,
                };

                if tx.send(frame).await.is_err() {
                    break;
                }
            }
            info!("Audio file playback finished: {}", audio.path);
        });

        self.task = Some(task);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.as_ref().map_or(false, |t| !t.is_finished())
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}
