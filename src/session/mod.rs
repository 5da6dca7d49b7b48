//! Assistant session management
//!
//! This module provides the `AssistantSession` abstraction that manages:
//! - Connection lifecycle with the assistant service
//! - Microphone capture and uplink
//! - Gapless playback of reply audio
//! - Reply aggregation into transcript entries

mod aggregator;
mod config;
mod events;
mod log;
mod reconnect;
mod session;
mod state;

pub use aggregator::ResponseAggregator;
pub use config::SessionConfig;
pub use events::UiEvent;
pub use log::{LogBook, LogEntry, LogSource, DEFAULT_LOG_CAPACITY};
pub use reconnect::ReconnectPolicy;
pub use session::{AssistantSession, SendError, SessionFlags, SessionSnapshot};
pub use state::ConnectionState;
