use super::log::LogEntry;
use super::state::ConnectionState;

/// Notifications for the presentation layer
#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    /// A transcript entry was appended
    Log(LogEntry),
    /// The session moved to a new state
    ///
    /// `unexpected` is set when the change was not requested by the caller
    /// (remote close, transport failure); reconnect policies key off it.
    ConnectionStateChanged {
        state: ConnectionState,
        unexpected: bool,
    },
    /// Reply audio started or stopped playing
    SpeakingChanged(bool),
    /// Microphone switched on or off, including the text-only fallback
    MicChanged(bool),
}
