// Output devices for the playback scheduler
//
// CpalOutput renders scheduled units on the default speaker. Its clock is
// the number of frames the device has actually consumed, so scheduling
// stays aligned with what is audible. NullOutput keeps the same timeline
// with tokio timers and no sound; it stands in when no speaker is usable.

use anyhow::{anyhow, bail, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::codec::WIRE_SAMPLE_RATE;
use super::playback::{EndedCallback, OutputDevice, PlaybackUnit, UnitId};
use super::resample::resample;

/// How long to wait for the output thread to report the stream state
const STREAM_READY_TIMEOUT: Duration = Duration::from_secs(5);

struct QueuedUnit {
    id: UnitId,
    start_frame: u64,
    samples: Vec<f32>,
    on_ended: Option<EndedCallback>,
}

impl QueuedUnit {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Maps scheduled start times onto device frames
///
/// A unit starting where the previous one ended continues on the exact
/// frame the previous one stopped at, so rounding never opens a gap.
#[derive(Debug)]
struct FramePlacer {
    rate: u32,
    last_end: Option<(f64, u64)>,
}

impl FramePlacer {
    fn new(rate: u32) -> Self {
        Self {
            rate,
            last_end: None,
        }
    }

    fn place(&mut self, start_time: f64, duration: f64, frames: usize) -> u64 {
        let half_frame = 0.5 / self.rate as f64;
        let start_frame = match self.last_end {
            Some((end_time, end_frame)) if (start_time - end_time).abs() < half_frame => end_frame,
            _ => (start_time * self.rate as f64).round() as u64,
        };

        self.last_end = Some((start_time + duration, start_frame + frames as u64));
        start_frame
    }
}

/// State shared between the scheduler side and the audio callback
struct Timeline {
    frames_played: u64,
    units: Vec<QueuedUnit>,
}

impl Timeline {
    /// Mix every unit overlapping the next `out.len()` frames into `out`
    ///
    /// Returns the completion callbacks of units that finished.
    fn render(&mut self, out: &mut [f32]) -> Vec<EndedCallback> {
        out.iter_mut().for_each(|s| *s = 0.0);

        let window_start = self.frames_played;
        let window_end = window_start + out.len() as u64;

        for unit in &self.units {
            let from = unit.start_frame.max(window_start);
            let to = unit.end_frame().min(window_end);
            for frame in from..to {
                let sample = unit.samples[(frame - unit.start_frame) as usize];
                out[(frame - window_start) as usize] += sample;
            }
        }

        // Simple addition can exceed full scale when units overlap
        out.iter_mut().for_each(|s| *s = s.clamp(-1.0, 1.0));

        self.frames_played = window_end;

        let mut finished = Vec::new();
        self.units.retain_mut(|unit| {
            if unit.end_frame() <= window_end {
                if let Some(cb) = unit.on_ended.take() {
                    finished.push(cb);
                }
                false
            } else {
                true
            }
        });
        finished
    }
}

/// Speaker output through cpal
pub struct CpalOutput {
    timeline: Arc<Mutex<Timeline>>,
    placer: FramePlacer,
    sample_rate: u32,
    device_name: String,
    stop_tx: Option<std::sync::mpsc::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl CpalOutput {
    /// Open the default output device, preferring the wire sample rate
    pub fn open() -> Result<Self> {
        let timeline = Arc::new(Mutex::new(Timeline {
            frames_played: 0,
            units: Vec::new(),
        }));

        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
        let shared = Arc::clone(&timeline);

        let worker = std::thread::Builder::new()
            .name("helios-output".to_string())
            .spawn(move || match build_output_stream(shared) {
                Ok((stream, rate, name)) => {
                    if let Err(e) = stream.play() {
                        let _ = ready_tx.send(Err(anyhow!("Failed to start output stream: {}", e)));
                        return;
                    }
                    let _ = ready_tx.send(Ok((rate, name)));
                    let _ = stop_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .context("Failed to spawn output thread")?;

        let (sample_rate, device_name) = ready_rx
            .recv_timeout(STREAM_READY_TIMEOUT)
            .context("Output thread did not report stream state")??;

        info!("Audio output ready: {} at {}Hz", device_name, sample_rate);

        Ok(Self {
            timeline,
            placer: FramePlacer::new(sample_rate),
            sample_rate,
            device_name,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Timeline> {
        // A panic in the audio callback must not take playback down with it
        self.timeline.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl OutputDevice for CpalOutput {
    fn current_time(&self) -> f64 {
        self.lock().frames_played as f64 / self.sample_rate as f64
    }

    fn schedule(&mut self, unit: PlaybackUnit, on_ended: EndedCallback) -> Result<()> {
        let samples = resample(&unit.buffer.samples, unit.buffer.sample_rate, self.sample_rate)?;
        let start_frame = self
            .placer
            .place(unit.start_time, unit.buffer.duration(), samples.len());

        self.lock().units.push(QueuedUnit {
            id: unit.id,
            start_frame,
            samples,
            on_ended: Some(on_ended),
        });
        Ok(())
    }

    fn stop(&mut self, id: UnitId) {
        self.lock().units.retain(|u| u.id != id);
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

impl Drop for CpalOutput {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Output thread panicked");
            }
        }
    }
}

fn build_output_stream(timeline: Arc<Mutex<Timeline>>) -> Result<(cpal::Stream, u32, String)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("No output device available"))?;
    let name = device.name().unwrap_or_else(|_| "default".to_string());

    // Prefer the wire rate so no resampling is needed
    let supported = device
        .supported_output_configs()
        .map_err(|e| anyhow!("Failed to query output configs: {}", e))?
        .find(|c| {
            c.min_sample_rate() <= SampleRate(WIRE_SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(WIRE_SAMPLE_RATE)
        })
        .map(|c| c.with_sample_rate(SampleRate(WIRE_SAMPLE_RATE)));

    let supported = match supported {
        Some(config) => config,
        None => device
            .default_output_config()
            .map_err(|e| anyhow!("Failed to query default output config: {}", e))?,
    };

    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.config();
    let channels = config.channels.max(1) as usize;
    let rate = config.sample_rate.0;

    debug!(
        "Output stream format: {:?}, {}Hz, {} channels",
        sample_format, rate, channels
    );

    let mut mono = Vec::new();
    let mut render = move |frames: usize| -> Vec<f32> {
        mono.resize(frames, 0.0);
        let finished = {
            let mut timeline = timeline.lock().unwrap_or_else(|p| p.into_inner());
            timeline.render(&mut mono)
        };
        for cb in finished {
            cb();
        }
        mono.clone()
    };

    let err_callback = |err: cpal::StreamError| {
        error!("Output stream error: {}", err);
    };

    let stream = match sample_format {
        SampleFormat::F32 => device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let mono = render(data.len() / channels);
                for (frame, value) in data.chunks_mut(channels).zip(mono) {
                    frame.iter_mut().for_each(|s| *s = value);
                }
            },
            err_callback,
            None,
        ),
        SampleFormat::I16 => device.build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                let mono = render(data.len() / channels);
                for (frame, value) in data.chunks_mut(channels).zip(mono) {
                    let v = (value * i16::MAX as f32) as i16;
                    frame.iter_mut().for_each(|s| *s = v);
                }
            },
            err_callback,
            None,
        ),
        other => bail!("Unsupported output sample format: {:?}", other),
    }
    .map_err(|e| anyhow!("Failed to build output stream: {}", e))?;

    Ok((stream, rate, name))
}

/// Silent output that keeps time with tokio timers
///
/// Units "play" for exactly their duration, so the speaking state still
/// follows the reply even without a speaker.
pub struct NullOutput {
    origin: Instant,
    timers: HashMap<UnitId, tokio::task::JoinHandle<()>>,
}

impl NullOutput {
    /// Create the device; must be called inside a Tokio runtime
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            timers: HashMap::new(),
        }
    }
}

impl Default for NullOutput {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputDevice for NullOutput {
    fn current_time(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn schedule(&mut self, unit: PlaybackUnit, on_ended: EndedCallback) -> Result<()> {
        self.timers.retain(|_, task| !task.is_finished());

        let end = unit.start_time + unit.buffer.duration();
        let deadline = self.origin + Duration::from_secs_f64(end.max(0.0));

        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            on_ended();
        });
        self.timers.insert(unit.id, task);
        Ok(())
    }

    fn stop(&mut self, id: UnitId) {
        if let Some(task) = self.timers.remove(&id) {
            task.abort();
        }
    }

    fn name(&self) -> &str {
        "null output"
    }
}

impl Drop for NullOutput {
    fn drop(&mut self) {
        for (_, task) in self.timers.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn unit(id: UnitId, start_frame: u64, samples: Vec<f32>, ended: &Arc<AtomicUsize>) -> QueuedUnit {
        let ended = Arc::clone(ended);
        QueuedUnit {
            id,
            start_frame,
            samples,
            on_ended: Some(Box::new(move || {
                ended.fetch_add(1, Ordering::SeqCst);
            })),
        }
    }

    #[test]
    fn test_render_places_units_at_their_start_frame() {
        let ended = Arc::new(AtomicUsize::new(0));
        let mut timeline = Timeline {
            frames_played: 0,
            units: vec![unit(1, 2, vec![0.5, 0.5], &ended)],
        };

        let mut out = vec![0.0; 4];
        for cb in timeline.render(&mut out) {
            cb();
        }

        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5]);
        assert_eq!(timeline.frames_played, 4);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert!(timeline.units.is_empty());
    }

    #[test]
    fn test_render_spans_callbacks_and_clips() {
        let ended = Arc::new(AtomicUsize::new(0));
        let mut timeline = Timeline {
            frames_played: 0,
            units: vec![
                unit(1, 0, vec![0.8; 6], &ended),
                unit(2, 0, vec![0.8; 2], &ended),
            ],
        };

        let mut out = vec![0.0; 4];
        let finished = timeline.render(&mut out);
        assert_eq!(finished.len(), 1);
        assert_eq!(out[0], 1.0); // 0.8 + 0.8 clipped
        assert_eq!(out[2], 0.8);

        let finished = timeline.render(&mut out);
        assert_eq!(finished.len(), 1);
        assert_eq!(out, vec![0.8, 0.8, 0.0, 0.0]);
    }

    #[test]
    fn test_back_to_back_units_share_a_boundary_frame() {
        let mut placer = FramePlacer::new(44100);

        // 1000 wire samples become 1838 device frames after rounding
        let duration = 1000.0 / 24000.0;
        let mut start_time = 0.1;
        let mut expected = placer.place(start_time, duration, 1838) + 1838;

        for _ in 0..20 {
            start_time += duration;
            let start_frame = placer.place(start_time, duration, 1838);
            assert_eq!(start_frame, expected);
            expected = start_frame + 1838;
        }
    }

    #[test]
    fn test_placement_after_a_pause_uses_the_clock() {
        let mut placer = FramePlacer::new(48000);
        assert_eq!(placer.place(0.0, 0.5, 24000), 0);
        assert_eq!(placer.place(2.0, 0.5, 24000), 96000);
    }
}
