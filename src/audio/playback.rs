// Gapless playback scheduling against a single output device
//
// Chunks arrive whenever the network delivers them. Each one is placed at
// max(device_now, next_start_time) on the device's own clock and
// next_start_time advances by the chunk's duration, so consecutive chunks
// butt up against each other without overlapping. If the network falls
// behind, device_now overtakes next_start_time and a gap appears, which is
// the honest rendering of an underrun.

use anyhow::Result;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::codec::AudioBuffer;

/// Identifier of a scheduled playback unit, unique for the process
pub type UnitId = u64;

/// Callback a device invokes once a unit has finished playing
pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// A buffer handed to the device with its start time
#[derive(Debug, Clone)]
pub struct PlaybackUnit {
    pub id: UnitId,
    /// Start time in seconds on the device clock
    pub start_time: f64,
    pub buffer: AudioBuffer,
}

/// Bookkeeping for a unit the scheduler considers active
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledUnit {
    pub id: UnitId,
    pub start_time: f64,
    pub duration: f64,
}

impl ScheduledUnit {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Audio output device with its own monotonic clock
pub trait OutputDevice: Send {
    /// Current time on the device clock, in seconds
    fn current_time(&self) -> f64;

    /// Queue a unit to start at `unit.start_time`
    ///
    /// `on_ended` fires once the unit has played out. It is not called
    /// for units removed with [`OutputDevice::stop`].
    fn schedule(&mut self, unit: PlaybackUnit, on_ended: EndedCallback) -> Result<()>;

    /// Stop a unit immediately, playing or not
    fn stop(&mut self, id: UnitId);

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Schedules decoded chunks for back-to-back playback
pub struct PlaybackScheduler {
    device: Box<dyn OutputDevice>,
    next_start_time: f64,
    active: HashMap<UnitId, ScheduledUnit>,
    next_id: UnitId,
    ended_tx: mpsc::UnboundedSender<UnitId>,
}

impl PlaybackScheduler {
    /// Create a scheduler; finished unit IDs are reported on `ended_tx`
    pub fn new(device: Box<dyn OutputDevice>, ended_tx: mpsc::UnboundedSender<UnitId>) -> Self {
        Self {
            device,
            next_start_time: 0.0,
            active: HashMap::new(),
            next_id: 1,
            ended_tx,
        }
    }

    /// Schedule a chunk right after everything already queued
    pub fn enqueue(&mut self, buffer: AudioBuffer) -> Result<ScheduledUnit> {
        let now = self.device.current_time();
        let start_time = now.max(self.next_start_time);
        let duration = buffer.duration();

        let id = self.next_id;
        self.next_id += 1;

        let ended_tx = self.ended_tx.clone();
        let on_ended: EndedCallback = Box::new(move || {
            let _ = ended_tx.send(id);
        });

        self.device.schedule(
            PlaybackUnit {
                id,
                start_time,
                buffer,
            },
            on_ended,
        )?;

        if start_time > self.next_start_time && self.next_start_time > 0.0 {
            debug!(
                "Playback underrun: {:.3}s gap before unit {}",
                start_time - self.next_start_time,
                id
            );
        }

        self.next_start_time = start_time + duration;

        let unit = ScheduledUnit {
            id,
            start_time,
            duration,
        };
        self.active.insert(id, unit);

        Ok(unit)
    }

    /// Release a finished unit
    ///
    /// Returns true when this completion left nothing playing. Completions
    /// for units that are no longer tracked are ignored.
    pub fn on_ended(&mut self, id: UnitId) -> bool {
        if self.active.remove(&id).is_none() {
            debug!("Ignoring completion of untracked unit {}", id);
            return false;
        }
        self.active.is_empty()
    }

    /// Force-stop everything and reset the timeline
    pub fn stop_all(&mut self) {
        if !self.active.is_empty() {
            debug!(
                "Stopping {} playback units on {}",
                self.active.len(),
                self.device.name()
            );
        }
        for id in self.active.keys().copied().collect::<Vec<_>>() {
            self.device.stop(id);
        }
        self.active.clear();
        self.next_start_time = 0.0;
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn device_name(&self) -> &str {
        self.device.name()
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        if !self.active.is_empty() {
            warn!("Playback scheduler dropped with {} active units", self.active.len());
            self.stop_all();
        }
    }
}
