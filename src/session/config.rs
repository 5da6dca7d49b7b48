use std::time::Duration;

use super::log::DEFAULT_LOG_CAPACITY;
use crate::audio::{AudioBackendConfig, DEFAULT_FRAME_SIZE};

/// Configuration for an assistant session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// How long to wait for any reply after a user message
    /// Default: 60 seconds
    pub inactivity_timeout: Duration,

    /// Transcript entries kept in memory
    pub log_capacity: usize,

    /// Samples per outbound microphone frame
    pub frame_size: usize,

    /// Capture format requested from the backend
    pub capture: AudioBackendConfig,

    /// Initial microphone switch
    pub mic_enabled: bool,

    /// Initial speaker mute
    pub muted: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(60),
            log_capacity: DEFAULT_LOG_CAPACITY,
            frame_size: DEFAULT_FRAME_SIZE,
            capture: AudioBackendConfig::default(),
            mic_enabled: true,
            muted: false,
        }
    }
}
