// Capture pipeline: microphone stream -> wire format -> fixed-size frames -> encoded chunks
//
// Device buffers arrive in whatever size, rate and channel layout the
// backend likes. They are mixed to mono, resampled to the wire rate,
// re-sliced into frames of exactly `frame_size` samples, and each frame is
// encoded and forwarded only if the gate is open at that moment.

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::backend::{AudioBackend, AudioFrame};
use super::codec::{EncodedChunk, WIRE_SAMPLE_RATE};
use super::resample::StreamResampler;

/// Samples per capture frame
pub const DEFAULT_FRAME_SIZE: usize = 4096;

/// Shared on/off switch consulted for every frame
#[derive(Debug, Clone)]
pub struct CaptureGate(Arc<AtomicBool>);

impl CaptureGate {
    pub fn new(open: bool) -> Self {
        Self(Arc::new(AtomicBool::new(open)))
    }

    pub fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn set(&self, open: bool) {
        self.0.store(open, Ordering::SeqCst);
    }
}

/// Re-slices an arbitrary sample stream into fixed-length frames
#[derive(Debug)]
pub struct FrameSlicer {
    frame_size: usize,
    pending: Vec<f32>,
}

impl FrameSlicer {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            pending: Vec::with_capacity(frame_size),
        }
    }

    /// Append samples and return every frame that is now complete
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut frames = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let take = (self.frame_size - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.frame_size {
                let frame = std::mem::replace(&mut self.pending, Vec::with_capacity(self.frame_size));
                frames.push(frame);
            }
        }

        frames
    }

    /// Samples waiting for the next frame to fill up
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

/// Converts backend frames to mono at the wire rate
#[derive(Default)]
pub struct WireFormat {
    resampler: Option<StreamResampler>,
}

impl WireFormat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mono samples at [`WIRE_SAMPLE_RATE`]; may be empty while the
    /// resampler fills its first chunk
    pub fn convert(&mut self, frame: AudioFrame) -> Result<Vec<f32>> {
        let frame = frame.into_mono();

        if frame.sample_rate == WIRE_SAMPLE_RATE {
            return Ok(frame.samples);
        }

        let resampler = match self.resampler.take() {
            Some(r) if r.input_rate() == frame.sample_rate => r,
            _ => {
                debug!(
                    "Resampling capture from {}Hz to {}Hz",
                    frame.sample_rate, WIRE_SAMPLE_RATE
                );
                StreamResampler::new(frame.sample_rate, WIRE_SAMPLE_RATE)?
            }
        };

        let resampler = self.resampler.insert(resampler);
        resampler.process(&frame.samples)
    }
}

/// A running capture: the backend plus the task slicing its output
pub struct CapturePipeline {
    backend: Box<dyn AudioBackend>,
    task: JoinHandle<()>,
}

impl CapturePipeline {
    /// Acquire the input stream and start forwarding encoded frames
    ///
    /// Fails only if the backend cannot be started; the caller decides
    /// how to degrade.
    pub async fn start<F>(
        mut backend: Box<dyn AudioBackend>,
        frame_size: usize,
        gate: CaptureGate,
        mut on_frame: F,
    ) -> Result<Self>
    where
        F: FnMut(EncodedChunk) + Send + 'static,
    {
        let mut audio_rx = backend
            .start()
            .await
            .with_context(|| format!("Failed to start {}", backend.name()))?;

        info!(
            "Capture pipeline started on {} ({} samples per frame)",
            backend.name(),
            frame_size
        );

        let task = tokio::spawn(async move {
            let mut format = WireFormat::new();
            let mut slicer = FrameSlicer::new(frame_size);
            let mut forwarded: u64 = 0;

            while let Some(frame) = audio_rx.recv().await {
                let samples = match format.convert(frame) {
                    Ok(samples) => samples,
                    Err(e) => {
                        error!("Dropping capture frame: {:#}", e);
                        continue;
                    }
                };

                for samples in slicer.push(&samples) {
                    if !gate.is_open() {
                        continue;
                    }
                    on_frame(EncodedChunk::from_samples(&samples, WIRE_SAMPLE_RATE));
                    forwarded += 1;
                }
            }

            debug!("Capture stream ended after {} frames", forwarded);
        });

        Ok(Self { backend, task })
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop forwarding and release the input stream
    pub async fn stop(mut self) {
        self.task.abort();
        if let Err(e) = self.backend.stop().await {
            error!("Failed to stop {}: {}", self.backend.name(), e);
        }
        info!("Capture pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slicer_emits_exact_frames() {
        let mut slicer = FrameSlicer::new(4);

        assert!(slicer.push(&[0.1, 0.2, 0.3]).is_empty());
        assert_eq!(slicer.pending_len(), 3);

        let frames = slicer.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames[1], vec![0.5, 0.6, 0.7, 0.8]);
        assert_eq!(slicer.pending_len(), 1);
    }

    #[test]
    fn test_wire_format_mixes_down_stereo() {
        let mut format = WireFormat::new();
        let frame = AudioFrame {
            samples: vec![0.2, 0.4, -0.5, 0.5],
            sample_rate: WIRE_SAMPLE_RATE,
            channels: 2,
            timestamp_ms: 0,
        };

        let samples = format.convert(frame).unwrap();
        assert_eq!(samples.len(), 2);
        assert!((samples[0] - 0.3).abs() < 1e-6);
        assert_eq!(samples[1], 0.0);
    }

    #[test]
    fn test_gate_is_shared() {
        let gate = CaptureGate::new(true);
        let clone = gate.clone();
        clone.set(false);
        assert!(!gate.is_open());
    }
}
