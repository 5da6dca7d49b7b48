// Test doubles shared by the integration tests
//
// Nothing here touches real devices or the network: the transport hands
// its inbound channel to the test, the output device runs on a clock the
// test sets by hand, and capture backends are fed from channels.

#![allow(dead_code)]

use anyhow::{bail, Result};
use helios_voice::audio::{
    AudioBackend, AudioBackendConfig, AudioFrame, CaptureSource, EndedCallback, OutputDevice,
    PlaybackUnit, UnitId,
};
use helios_voice::session::{AssistantSession, ConnectionState, SessionConfig};
use helios_voice::transport::{
    Connection, InboundEvent, MessageSink, OutboundMessage, Part, Transport,
};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};

// ============================================================================
// Transport
// ============================================================================

#[derive(Default)]
struct TransportState {
    sent: Vec<OutboundMessage>,
    inbound: Vec<mpsc::Sender<InboundEvent>>,
    closed: usize,
}

/// In-memory transport; every connect yields a fresh inbound channel
#[derive(Clone)]
pub struct ChannelTransport {
    state: Arc<Mutex<TransportState>>,
    connects: Arc<AtomicUsize>,
    fail_connect: Arc<AtomicBool>,
    fail_send: Arc<AtomicBool>,
    gate: Option<Arc<Semaphore>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState::default())),
            connects: Arc::new(AtomicUsize::new(0)),
            fail_connect: Arc::new(AtomicBool::new(false)),
            fail_send: Arc::new(AtomicBool::new(false)),
            gate: None,
        }
    }

    /// Connect attempts block until [`ChannelTransport::open_gate`]
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    pub fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub fn fail_connects(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_send.store(fail, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.state.lock().unwrap().closed
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Sent user turns, audio uplink excluded
    pub fn sent_turns(&self) -> Vec<OutboundMessage> {
        self.sent().into_iter().filter(|m| m.turn_complete).collect()
    }

    pub fn sent_audio(&self) -> Vec<OutboundMessage> {
        self.sent().into_iter().filter(|m| !m.turn_complete).collect()
    }

    /// Sender for the most recent connection's inbound stream
    pub fn inbound(&self) -> mpsc::Sender<InboundEvent> {
        self.state
            .lock()
            .unwrap()
            .inbound
            .last()
            .cloned()
            .expect("no connection has been opened")
    }

    /// Drop every inbound sender, as if the remote went away
    pub fn hang_up(&self) {
        self.state.lock().unwrap().inbound.clear();
    }
}

#[async_trait::async_trait]
impl Transport for ChannelTransport {
    async fn connect(&self) -> Result<Connection> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire().await?.forget();
        }

        if self.fail_connect.load(Ordering::SeqCst) {
            bail!("connection refused");
        }

        let (tx, rx) = mpsc::channel(64);
        self.state.lock().unwrap().inbound.push(tx);

        Ok(Connection {
            sink: Box::new(RecordingSink {
                state: self.state.clone(),
                fail_send: self.fail_send.clone(),
            }),
            inbound: rx,
        })
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}

struct RecordingSink {
    state: Arc<Mutex<TransportState>>,
    fail_send: Arc<AtomicBool>,
}

#[async_trait::async_trait]
impl MessageSink for RecordingSink {
    async fn send(&mut self, message: &OutboundMessage) -> Result<()> {
        if self.fail_send.load(Ordering::SeqCst) {
            bail!("broken pipe");
        }
        self.state.lock().unwrap().sent.push(message.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closed += 1;
        Ok(())
    }
}

// ============================================================================
// Output device
// ============================================================================

#[derive(Default)]
struct ClockState {
    now: f64,
    scheduled: Vec<(UnitId, f64, f64)>,
    pending: HashMap<UnitId, EndedCallback>,
    stopped: Vec<UnitId>,
}

/// Output device whose clock only moves when the test says so
#[derive(Clone, Default)]
pub struct ManualClock {
    state: Arc<Mutex<ClockState>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(&self) -> Box<dyn OutputDevice> {
        Box::new(ManualClockOutput {
            state: self.state.clone(),
        })
    }

    pub fn set_now(&self, now: f64) {
        self.state.lock().unwrap().now = now;
    }

    /// (id, start, duration) for every unit handed to the device
    pub fn scheduled(&self) -> Vec<(UnitId, f64, f64)> {
        self.state.lock().unwrap().scheduled.clone()
    }

    pub fn stopped(&self) -> Vec<UnitId> {
        self.state.lock().unwrap().stopped.clone()
    }

    /// Play a unit out; false if it was stopped or never scheduled
    pub fn finish(&self, id: UnitId) -> bool {
        let callback = self.state.lock().unwrap().pending.remove(&id);
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }
}

struct ManualClockOutput {
    state: Arc<Mutex<ClockState>>,
}

impl OutputDevice for ManualClockOutput {
    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().now
    }

    fn schedule(&mut self, unit: PlaybackUnit, on_ended: EndedCallback) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .scheduled
            .push((unit.id, unit.start_time, unit.buffer.duration()));
        state.pending.insert(unit.id, on_ended);
        Ok(())
    }

    fn stop(&mut self, id: UnitId) {
        let mut state = self.state.lock().unwrap();
        state.pending.remove(&id);
        state.stopped.push(id);
    }

    fn name(&self) -> &str {
        "manual clock"
    }
}

// ============================================================================
// Capture
// ============================================================================

/// Capture source that always fails, like a denied permission prompt
pub struct DeniedCapture;

impl CaptureSource for DeniedCapture {
    fn open(&self, _config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        bail!("microphone permission denied")
    }
}

/// Capture source whose backends are fed by the test
#[derive(Clone, Default)]
pub struct ScriptedCapture {
    feed: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
    opened: Arc<AtomicUsize>,
}

impl ScriptedCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        self.feed.lock().unwrap().is_some()
    }

    /// Push 24kHz mono samples into the running backend
    pub async fn feed(&self, samples: Vec<f32>) {
        self.feed_frame(AudioFrame {
            samples,
            sample_rate: 24000,
            channels: 1,
            timestamp_ms: 0,
        })
        .await;
    }

    /// Push a frame in any device format
    pub async fn feed_frame(&self, frame: AudioFrame) {
        let tx = self.feed.lock().unwrap().clone().expect("capture not started");
        let _ = tx.send(frame).await;
    }
}

impl CaptureSource for ScriptedCapture {
    fn open(&self, _config: &AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedBackend {
            feed: self.feed.clone(),
        }))
    }
}

struct ScriptedBackend {
    feed: Arc<Mutex<Option<mpsc::Sender<AudioFrame>>>>,
}

#[async_trait::async_trait]
impl AudioBackend for ScriptedBackend {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        let (tx, rx) = mpsc::channel(16);
        *self.feed.lock().unwrap() = Some(tx);
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        self.feed.lock().unwrap().take();
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.feed.lock().unwrap().is_some()
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Session config with the microphone off and a short log
pub fn text_only_config() -> SessionConfig {
    SessionConfig {
        mic_enabled: false,
        ..SessionConfig::default()
    }
}

pub fn text_session(transport: &ChannelTransport, clock: &ManualClock) -> AssistantSession {
    AssistantSession::new(
        text_only_config(),
        Arc::new(transport.clone()),
        Arc::new(DeniedCapture),
        clock.device(),
    )
}

/// Poll `check` until it holds, letting spawned tasks run in between
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

pub async fn wait_for_state(session: &AssistantSession, state: ConnectionState) {
    let reached = eventually(move || async move { session.state().await == state }).await;
    assert!(
        reached,
        "session never reached {} (currently {})",
        state,
        session.state().await
    );
}

/// Let queued tasks drain without moving the clock far
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(1)).await;
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Base64 PCM for `count` samples of a constant value
pub fn wire_audio(value: f32, count: usize) -> String {
    helios_voice::audio::EncodedChunk::from_samples(&vec![value; count], 24000).into_wire_text()
}

pub fn text_of(message: &OutboundMessage) -> Vec<String> {
    message
        .parts
        .iter()
        .filter_map(|p| match p {
            Part::Text(t) => Some(t.clone()),
            Part::InlineBinary(_) => None,
        })
        .collect()
}
