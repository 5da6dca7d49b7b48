use super::aggregator::ResponseAggregator;
use super::config::SessionConfig;
use super::events::UiEvent;
use super::log::{LogBook, LogEntry, LogSource};
use super::state::ConnectionState;
use crate::attachment::Attachment;
use crate::audio::{
    decode_wire_audio, CaptureGate, CapturePipeline, CaptureSource, EncodedChunk, OutputDevice,
    PlaybackScheduler, UnitId, WIRE_SAMPLE_RATE,
};
use crate::transport::{
    Connection, InboundEvent, LifecycleEvent, MessageSink, OutboundMessage, Part, Transport,
};
use anyhow::Result;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Microphone frames waiting to be sent; older frames are dropped past this
const UPLINK_CAPACITY: usize = 8;

/// Buffered UI events per subscriber
const EVENT_CAPACITY: usize = 256;

/// Why a message could not be sent
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("not connected")]
    NotConnected,

    #[error("nothing to send")]
    Empty,

    #[error("transport failure: {0}")]
    Transport(String),
}

/// Mute and microphone switches, read by callbacks when they fire
#[derive(Debug, Clone)]
pub struct SessionFlags {
    mic: CaptureGate,
    muted: Arc<AtomicBool>,
}

impl SessionFlags {
    fn new(mic_enabled: bool, muted: bool) -> Self {
        Self {
            mic: CaptureGate::new(mic_enabled),
            muted: Arc::new(AtomicBool::new(muted)),
        }
    }

    pub fn mic_enabled(&self) -> bool {
        self.mic.is_open()
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }
}

/// Point-in-time view of the session for the presentation layer
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: ConnectionState,
    pub speaking: bool,
    pub mic_on: bool,
    pub muted: bool,
    pub capturing: bool,
    pub active_playback_units: usize,
    pub logs: Vec<LogEntry>,
}

/// Voice/text session with the assistant service
///
/// All state lives in one core behind an async mutex. Device callbacks,
/// inbound messages and timers each take the lock in turn, so handlers run
/// one at a time. Every callback carries the epoch it was created under
/// and is ignored once the session has been torn down.
pub struct AssistantSession {
    shared: Shared,
    ended_task: JoinHandle<()>,
}

#[derive(Clone)]
struct Shared {
    core: Arc<Mutex<SessionCore>>,
    flags: SessionFlags,
    config: Arc<SessionConfig>,
    events: broadcast::Sender<UiEvent>,
    transport: Arc<dyn Transport>,
    capture_source: Arc<dyn CaptureSource>,
}

struct SessionCore {
    state: ConnectionState,
    epoch: u64,
    events: broadcast::Sender<UiEvent>,
    sink: Option<Box<dyn MessageSink>>,
    connector: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    pending: VecDeque<OutboundMessage>,
    capture: Option<CapturePipeline>,
    uplink: Option<JoinHandle<()>>,
    playback: PlaybackScheduler,
    aggregator: ResponseAggregator,
    log: LogBook,
    timer: Option<JoinHandle<()>>,
    timer_generation: u64,
    speaking: bool,
}

/// Resources detached from the core during teardown
struct Detached {
    connector: Option<JoinHandle<()>>,
    reader: Option<JoinHandle<()>>,
    uplink: Option<JoinHandle<()>>,
    capture: Option<CapturePipeline>,
    sink: Option<Box<dyn MessageSink>>,
}

impl Detached {
    async fn release(self) {
        for task in [self.connector, self.reader, self.uplink].into_iter().flatten() {
            task.abort();
        }
        if let Some(capture) = self.capture {
            capture.stop().await;
        }
        if let Some(mut sink) = self.sink {
            if let Err(e) = sink.close().await {
                warn!("Failed to close connection: {:#}", e);
            }
        }
    }
}

impl AssistantSession {
    /// Create an idle session; must be called inside a Tokio runtime
    pub fn new(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        capture_source: Arc<dyn CaptureSource>,
        output: Box<dyn OutputDevice>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (ended_tx, mut ended_rx) = mpsc::unbounded_channel::<UnitId>();

        info!(
            "Creating assistant session (transport: {}, output: {})",
            transport.name(),
            output.name()
        );

        let flags = SessionFlags::new(config.mic_enabled, config.muted);
        let core = SessionCore {
            state: ConnectionState::Idle,
            epoch: 0,
            events: events.clone(),
            sink: None,
            connector: None,
            reader: None,
            pending: VecDeque::new(),
            capture: None,
            uplink: None,
            playback: PlaybackScheduler::new(output, ended_tx),
            aggregator: ResponseAggregator::new(),
            log: LogBook::new(config.log_capacity),
            timer: None,
            timer_generation: 0,
            speaking: false,
        };

        let shared = Shared {
            core: Arc::new(Mutex::new(core)),
            flags,
            config: Arc::new(config),
            events,
            transport,
            capture_source,
        };

        let playback_shared = shared.clone();
        let ended_task = tokio::spawn(async move {
            while let Some(id) = ended_rx.recv().await {
                playback_shared.on_playback_ended(id).await;
            }
        });

        Self { shared, ended_task }
    }

    /// Receive UI events from now on
    pub fn subscribe(&self) -> broadcast::Receiver<UiEvent> {
        self.shared.events.subscribe()
    }

    pub fn flags(&self) -> &SessionFlags {
        &self.shared.flags
    }

    /// Open a new session; no-op while connecting or open
    pub async fn connect(&self) {
        self.shared.connect().await;
    }

    /// Tear the session down; safe from any state
    pub async fn disconnect(&self) {
        let mut core = self.shared.core.lock().await;

        if !core.state.is_active() {
            debug!("Disconnect requested while {}", core.state);
            core.teardown().release().await;
            // Re-announced so watchers drop any pending reconnect
            let state = core.state;
            core.emit(UiEvent::ConnectionStateChanged {
                state,
                unexpected: false,
            });
            return;
        }

        info!("Disconnecting assistant session");
        core.set_state(ConnectionState::Closing, false);
        core.teardown().release().await;
        core.set_state(ConnectionState::Closed, false);
        core.log(LogSource::System, "Session ended.");
    }

    /// Send a complete user turn
    ///
    /// Sent immediately when open, queued while connecting, rejected with
    /// [`SendError::NotConnected`] otherwise. Callers should surface the
    /// rejection; [`AssistantSession::submit`] does.
    pub async fn send(&self, parts: Vec<Part>) -> Result<(), SendError> {
        if parts.is_empty() {
            return Err(SendError::Empty);
        }
        self.shared.send_turn(OutboundMessage::user_turn(parts)).await
    }

    /// Message-send pipeline used by the UI
    ///
    /// Logs the user entry right away, connects if the session is idle,
    /// then sends. Rejections are appended to the transcript as errors.
    pub async fn submit(&self, text: &str, attachment: Option<Attachment>) -> Result<(), SendError> {
        let text = text.trim();
        let display = match (&attachment, text.is_empty()) {
            (None, true) => return Err(SendError::Empty),
            (Some(file), true) => format!("[Attached file: {}]", file.name),
            (_, false) => text.to_string(),
        };

        let needs_connect = {
            let mut core = self.shared.core.lock().await;
            core.log(LogSource::User, display);
            core.state == ConnectionState::Idle
        };

        if needs_connect {
            self.shared.connect().await;
        }

        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(Part::Text(text.to_string()));
        }
        if let Some(file) = attachment {
            parts.push(file.into_part());
        }

        let result = self.shared.send_turn(OutboundMessage::user_turn(parts)).await;

        if let Err(SendError::NotConnected) = &result {
            warn!("Message rejected: session not connected");
            let mut core = self.shared.core.lock().await;
            core.log(LogSource::Error, "Not connected to the assistant service.");
        }

        result
    }

    /// Drop incoming reply audio while muted
    pub async fn set_muted(&self, muted: bool) {
        self.shared.flags.muted.store(muted, Ordering::SeqCst);
        debug!("Speaker {}", if muted { "muted" } else { "unmuted" });
    }

    /// Switch the microphone; enabling while open starts capture
    pub async fn set_mic_enabled(&self, enabled: bool) {
        let mut core = self.shared.core.lock().await;
        self.shared.flags.mic.set(enabled);
        core.emit(UiEvent::MicChanged(enabled));

        if enabled && core.state == ConnectionState::Open && core.capture.is_none() {
            let epoch = core.epoch;
            self.shared.start_capture(&mut core, epoch).await;
        }
    }

    /// Append an entry on behalf of the presentation layer
    pub async fn append_log(&self, source: LogSource, text: impl Into<String>) {
        let mut core = self.shared.core.lock().await;
        core.log(source, text);
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.core.lock().await.state
    }

    pub async fn is_speaking(&self) -> bool {
        self.shared.core.lock().await.speaking
    }

    pub async fn logs(&self) -> Vec<LogEntry> {
        self.shared.core.lock().await.log.entries()
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let core = self.shared.core.lock().await;
        SessionSnapshot {
            state: core.state,
            speaking: core.speaking,
            mic_on: self.shared.flags.mic_enabled(),
            muted: self.shared.flags.muted(),
            capturing: core.capture.is_some(),
            active_playback_units: core.playback.active_count(),
            logs: core.log.entries(),
        }
    }
}

impl Drop for AssistantSession {
    fn drop(&mut self) {
        self.ended_task.abort();
        if let Ok(mut core) = self.shared.core.try_lock() {
            let detached = core.teardown();
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(detached.release());
            }
        }
    }
}

impl Shared {
    async fn connect(&self) {
        let mut core = self.core.lock().await;

        if !core.state.can_connect() {
            debug!("Connect ignored while {}", core.state);
            return;
        }

        // Anything left from a previous session goes first
        core.teardown().release().await;
        let epoch = core.epoch;

        core.set_state(ConnectionState::Connecting, false);
        core.log(LogSource::System, "Connecting to the assistant service...");

        let shared = self.clone();
        core.connector = Some(tokio::spawn(async move {
            let result = shared.transport.connect().await;
            shared.on_connect_result(epoch, result).await;
        }));
    }

    async fn on_connect_result(&self, epoch: u64, result: Result<Connection>) {
        let mut core = self.core.lock().await;

        if core.epoch != epoch || core.state != ConnectionState::Connecting {
            debug!("Discarding connection result from stale session {}", epoch);
            if let Ok(mut connection) = result {
                let _ = connection.sink.close().await;
            }
            return;
        }
        core.connector = None;

        let connection = match result {
            Ok(connection) => connection,
            Err(e) => {
                error!("Failed to connect: {:#}", e);
                core.fail(format!("Connection failed: {}", e));
                return;
            }
        };

        core.sink = Some(connection.sink);

        let shared = self.clone();
        let mut inbound = connection.inbound;
        core.reader = Some(tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                if !shared.on_inbound(epoch, event).await {
                    return;
                }
            }
            shared.on_remote_closed(epoch, None).await;
        }));

        core.set_state(ConnectionState::Open, false);
        core.log(LogSource::System, "Session online.");
        info!("Assistant session open");

        if self.flags.mic_enabled() {
            self.start_capture(&mut core, epoch).await;
        }

        while let Some(message) = core.pending.pop_front() {
            if let Err(e) = core.send_now(&message).await {
                error!("Failed to flush queued message: {:#}", e);
                core.fail(format!("Send failed: {}", e));
                return;
            }
        }
    }

    async fn send_turn(&self, message: OutboundMessage) -> Result<(), SendError> {
        let mut core = self.core.lock().await;

        match core.state {
            ConnectionState::Open => {
                let epoch = core.epoch;
                self.arm_timer(&mut core, epoch);
                if let Err(e) = core.send_now(&message).await {
                    error!("Failed to send message: {:#}", e);
                    let reason = e.to_string();
                    core.fail(format!("Send failed: {}", reason));
                    return Err(SendError::Transport(reason));
                }
                Ok(())
            }
            ConnectionState::Connecting => {
                let epoch = core.epoch;
                self.arm_timer(&mut core, epoch);
                debug!("Queueing message until the session opens");
                core.pending.push_back(message);
                Ok(())
            }
            _ => Err(SendError::NotConnected),
        }
    }

    /// Handle one inbound event; false once the session is stale
    async fn on_inbound(&self, epoch: u64, event: InboundEvent) -> bool {
        let mut core = self.core.lock().await;

        if core.epoch != epoch || core.state != ConnectionState::Open {
            debug!("Ignoring inbound event from stale session {}", epoch);
            return false;
        }

        match event {
            InboundEvent::AudioFragment(data) => {
                self.rearm_timer(&mut core, epoch);

                if self.flags.muted() {
                    return true;
                }

                match decode_wire_audio(&data, WIRE_SAMPLE_RATE) {
                    Ok(buffer) => match core.playback.enqueue(buffer) {
                        Ok(unit) => {
                            debug!(
                                "Scheduled unit {} at {:.3}s ({:.3}s)",
                                unit.id, unit.start_time, unit.duration
                            );
                            core.set_speaking(true);
                        }
                        Err(e) => {
                            warn!("Failed to schedule playback: {:#}", e);
                            core.log(LogSource::Error, format!("Audio playback failed: {}", e));
                        }
                    },
                    Err(e) => {
                        warn!("Dropping audio chunk: {}", e);
                        core.log(LogSource::Error, format!("Dropped malformed audio chunk: {}", e));
                    }
                }
            }
            InboundEvent::TextFragment(text) => {
                self.rearm_timer(&mut core, epoch);
                core.aggregator.push_text(&text);
            }
            InboundEvent::TurnComplete => {
                core.cancel_timer();
                if let Some(utterance) = core.aggregator.complete_turn() {
                    core.log(LogSource::Jarvis, utterance);
                }
            }
            InboundEvent::Malformed(reason) => {
                warn!("Dropping malformed message: {}", reason);
                core.log(LogSource::Error, "Dropped a malformed message from the server.");
            }
            InboundEvent::Lifecycle(LifecycleEvent::Error(reason)) => {
                error!("Assistant service error: {}", reason);
                core.fail(format!("Server error: {}", reason));
                return false;
            }
            InboundEvent::Lifecycle(LifecycleEvent::Closed { reason }) => {
                drop(core);
                self.on_remote_closed(epoch, reason).await;
                return false;
            }
        }

        true
    }

    async fn on_remote_closed(&self, epoch: u64, reason: Option<String>) {
        let mut core = self.core.lock().await;

        if core.epoch != epoch || !core.state.is_active() {
            return;
        }

        let reason = reason.unwrap_or_else(|| "connection closed".to_string());
        warn!("Assistant session closed by remote: {}", reason);

        let detached = core.teardown();
        core.set_state(ConnectionState::Closed, true);
        core.log(LogSource::Error, format!("Connection lost: {}", reason));
        tokio::spawn(detached.release());
    }

    async fn on_capture_frame(&self, epoch: u64, chunk: EncodedChunk) {
        let mut core = self.core.lock().await;

        if core.epoch != epoch || core.state != ConnectionState::Open {
            return;
        }

        if let Err(e) = core.send_now(&OutboundMessage::audio(chunk)).await {
            error!("Failed to send microphone audio: {:#}", e);
            core.fail(format!("Send failed: {}", e));
        }
    }

    async fn on_playback_ended(&self, id: UnitId) {
        let mut core = self.core.lock().await;
        if core.playback.on_ended(id) {
            core.set_speaking(false);
        }
    }

    async fn on_inactivity(&self, epoch: u64, generation: u64) {
        let mut core = self.core.lock().await;

        if core.epoch != epoch || core.timer_generation != generation || !core.state.is_active() {
            return;
        }
        core.timer = None;

        match core.aggregator.complete_turn() {
            Some(utterance) => {
                warn!("Turn never completed; flushing partial reply");
                core.log(LogSource::Jarvis, utterance);
            }
            None => {
                warn!(
                    "No response within {}s",
                    self.config.inactivity_timeout.as_secs()
                );
                core.log(LogSource::Error, "No response from server.");
            }
        }
    }

    /// Start the liveness timer, replacing any running one
    fn arm_timer(&self, core: &mut SessionCore, epoch: u64) {
        core.cancel_timer();
        let generation = core.timer_generation;
        let timeout = self.config.inactivity_timeout;
        let shared = self.clone();

        core.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            shared.on_inactivity(epoch, generation).await;
        }));
    }

    /// Restart the liveness timer only if a reply is awaited
    fn rearm_timer(&self, core: &mut SessionCore, epoch: u64) {
        if core.timer.is_some() {
            self.arm_timer(core, epoch);
        }
    }

    async fn start_capture(&self, core: &mut SessionCore, epoch: u64) {
        if let Some(previous) = core.capture.take() {
            previous.stop().await;
        }
        if let Some(uplink) = core.uplink.take() {
            uplink.abort();
        }

        let backend = match self.capture_source.open(&self.config.capture) {
            Ok(backend) => backend,
            Err(e) => {
                self.degrade_to_text(core, e);
                return;
            }
        };

        let (tx, mut rx) = mpsc::channel::<EncodedChunk>(UPLINK_CAPACITY);
        let started = CapturePipeline::start(
            backend,
            self.config.frame_size,
            self.flags.mic.clone(),
            move |chunk| {
                // No backpressure: a frame that cannot be queued is stale
                let _ = tx.try_send(chunk);
            },
        )
        .await;

        match started {
            Ok(pipeline) => {
                let shared = self.clone();
                core.uplink = Some(tokio::spawn(async move {
                    while let Some(chunk) = rx.recv().await {
                        shared.on_capture_frame(epoch, chunk).await;
                    }
                }));
                core.capture = Some(pipeline);
                info!("Microphone streaming");
            }
            Err(e) => self.degrade_to_text(core, e),
        }
    }

    fn degrade_to_text(&self, core: &mut SessionCore, reason: anyhow::Error) {
        warn!("Microphone unavailable, continuing text-only: {:#}", reason);
        self.flags.mic.set(false);
        core.emit(UiEvent::MicChanged(false));
        core.log(
            LogSource::System,
            "Microphone unavailable; continuing in text-only mode.",
        );
    }
}

impl SessionCore {
    fn emit(&self, event: UiEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn log(&mut self, source: LogSource, text: impl Into<String>) {
        let entry = self.log.push(source, text);
        self.emit(UiEvent::Log(entry));
    }

    fn set_state(&mut self, state: ConnectionState, unexpected: bool) {
        if self.state == state {
            return;
        }
        debug!("Session state {} -> {}", self.state, state);
        self.state = state;
        self.emit(UiEvent::ConnectionStateChanged { state, unexpected });
    }

    fn set_speaking(&mut self, speaking: bool) {
        if self.speaking != speaking {
            self.speaking = speaking;
            self.emit(UiEvent::SpeakingChanged(speaking));
        }
    }

    fn cancel_timer(&mut self) {
        self.timer_generation += 1;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }

    async fn send_now(&mut self, message: &OutboundMessage) -> Result<()> {
        match self.sink.as_mut() {
            Some(sink) => sink.send(message).await,
            None => anyhow::bail!("no open connection"),
        }
    }

    /// Invalidate the current session and detach its resources
    ///
    /// Idempotent. Local state is reset here; the caller releases the
    /// detached resources, inline or on a fresh task.
    fn teardown(&mut self) -> Detached {
        self.epoch += 1;
        self.cancel_timer();
        self.pending.clear();
        self.aggregator.clear();
        self.playback.stop_all();
        self.set_speaking(false);

        Detached {
            connector: self.connector.take(),
            reader: self.reader.take(),
            uplink: self.uplink.take(),
            capture: self.capture.take(),
            sink: self.sink.take(),
        }
    }

    /// Transport failure: tear down, mark as error, tell the user
    fn fail(&mut self, message: String) {
        let detached = self.teardown();
        self.set_state(ConnectionState::Error, true);
        self.log(LogSource::Error, message);
        tokio::spawn(detached.release());
    }
}
