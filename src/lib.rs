pub mod attachment;
pub mod audio;
pub mod config;
pub mod http;
pub mod session;
pub mod transport;

pub use attachment::Attachment;
pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioBuffer, AudioFile, AudioFrame,
    AudioSource, CaptureSource, CpalOutput, EncodedChunk, NullOutput, OutputDevice,
    PlaybackScheduler,
};
pub use config::Config;
pub use http::{create_router, AppState};
pub use session::{
    AssistantSession, ConnectionState, LogEntry, LogSource, ReconnectPolicy, SendError,
    SessionConfig, UiEvent,
};
pub use transport::{NatsTransport, NatsTransportConfig, Part, Transport};
