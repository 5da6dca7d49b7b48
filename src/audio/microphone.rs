//! Microphone capture using cpal

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::SampleFormat;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioFrame};

/// Capacity of the frame channel; frames beyond it are dropped
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// Microphone backend on the default cpal input device
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread
/// for its whole lifetime and is dropped there when capture stops.
pub struct MicrophoneBackend {
    device_name: String,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl MicrophoneBackend {
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| anyhow!("No input device available"))?;

        let device_name = device.name().unwrap_or_else(|_| "default".to_string());

        info!("Microphone backend initialized: {}", device_name);

        Ok(Self {
            device_name,
            stop_tx: None,
            worker: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for MicrophoneBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.worker.is_some() {
            bail!("Already capturing");
        }

        let (frame_tx, frame_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel();

        let worker = std::thread::Builder::new()
            .name("helios-microphone".to_string())
            .spawn(move || run_input_stream(frame_tx, ready_tx, stop_rx))
            .context("Failed to spawn microphone thread")?;

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = worker.join();
                return Err(e.context("Failed to open microphone stream"));
            }
            Err(_) => {
                let _ = worker.join();
                bail!("Microphone thread exited before the stream started");
            }
        }

        self.stop_tx = Some(stop_tx);
        self.worker = Some(worker);

        info!("Microphone capture started on {}", self.device_name);

        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        tokio::task::spawn_blocking(move || worker.join())
            .await
            .context("Failed to join microphone thread")?
            .map_err(|_| anyhow!("Microphone thread panicked"))?;

        info!("Microphone capture stopped");

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.worker.is_some()
    }

    fn name(&self) -> &str {
        "cpal microphone"
    }
}

impl Drop for MicrophoneBackend {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
    }
}

/// Own the input stream until told to stop
fn run_input_stream(
    frame_tx: mpsc::Sender<AudioFrame>,
    ready_tx: oneshot::Sender<Result<()>>,
    stop_rx: std::sync::mpsc::Receiver<()>,
) {
    let stream = match build_input_stream(frame_tx) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(anyhow!("Failed to start input stream: {}", e)));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // Either an explicit stop or the backend being dropped ends capture
    let _ = stop_rx.recv();
    drop(stream);
}

fn build_input_stream(
    frame_tx: mpsc::Sender<AudioFrame>,
) -> Result<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    let supported = device
        .default_input_config()
        .map_err(|e| anyhow!("Failed to query default input config: {}", e))?;

    let sample_format = supported.sample_format();
    let stream_config: cpal::StreamConfig = supported.config();
    let native_rate = stream_config.sample_rate.0;
    let native_channels = stream_config.channels;

    info!(
        "Input stream format: {:?}, {}Hz, {} channels",
        sample_format, native_rate, native_channels
    );

    let started = Instant::now();
    let dropped = Arc::new(AtomicU64::new(0));

    let deliver = move |samples: Vec<f32>| {
        let frame = AudioFrame {
            samples,
            sample_rate: native_rate,
            channels: native_channels,
            timestamp_ms: started.elapsed().as_millis() as u64,
        };

        // No backpressure: a full channel means the frame is stale anyway
        if frame_tx.try_send(frame).is_err() {
            let count = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 1 {
                warn!("Dropped {} microphone frames (consumer saturated)", count);
            }
        }
    };

    let err_callback = |err: cpal::StreamError| {
        error!("Microphone stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| deliver(data.to_vec()),
            err_callback,
            None,
        ),
        SampleFormat::I16 => device.build_input_stream(
            &stream_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                deliver(data.iter().map(|&s| s as f32 / 32768.0).collect())
            },
            err_callback,
            None,
        ),
        SampleFormat::U16 => device.build_input_stream(
            &stream_config,
            move |data: &[u16], _: &cpal::InputCallbackInfo| {
                deliver(
                    data.iter()
                        .map(|&s| (s as f32 - 32768.0) / 32768.0)
                        .collect(),
                )
            },
            err_callback,
            None,
        ),
        other => bail!("Unsupported input sample format: {:?}", other),
    }
    .map_err(|e| anyhow!("Failed to build input stream: {}", e))?;

    Ok(stream)
}
