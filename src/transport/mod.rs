//! Connection to the remote assistant service
//!
//! The session only sees the [`Transport`] trait: `connect()` resolving is
//! the open event, so it must not resolve before the service has accepted
//! the session. The returned [`Connection`] carries a sink for outbound
//! messages and a channel of validated inbound events. The channel ending
//! means the remote side went away.

pub mod messages;
pub mod nats;

use anyhow::Result;
use tokio::sync::mpsc;

pub use messages::{
    ClientEnvelope, ContentMessage, InlineBinary, OutboundMessage, Part, ServerMessage, SetupAck,
    SetupMessage,
};
pub use nats::{NatsTransport, NatsTransportConfig};

/// Out-of-band connection events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// Remote side closed the stream
    Closed { reason: Option<String> },
    /// Remote side reported a failure
    Error(String),
}

/// Inbound traffic after validation at the transport boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// Base64 PCM audio
    AudioFragment(String),
    TextFragment(String),
    TurnComplete,
    /// Payload that could not be parsed; dropped by the session
    Malformed(String),
    Lifecycle(LifecycleEvent),
}

/// Outbound half of an open connection
#[async_trait::async_trait]
pub trait MessageSink: Send + Sync {
    async fn send(&mut self, message: &OutboundMessage) -> Result<()>;

    /// Close the connection; calling it twice is harmless
    async fn close(&mut self) -> Result<()>;
}

/// An open connection
pub struct Connection {
    pub sink: Box<dyn MessageSink>,
    pub inbound: mpsc::Receiver<InboundEvent>,
}

/// Something that can open connections to the assistant service
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<Connection>;

    /// Transport name for logging
    fn name(&self) -> &str;
}
