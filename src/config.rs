use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;

use crate::audio::{AudioBackendConfig, AudioSource, DEFAULT_FRAME_SIZE};
use crate::session::{ReconnectPolicy, SessionConfig, DEFAULT_LOG_CAPACITY};
use crate::transport::NatsTransportConfig;

/// Environment overrides look like `HELIOS__TRANSPORT__NATS_URL`
pub const ENV_PREFIX: &str = "HELIOS";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
    pub transport: TransportConfig,
    pub session: SessionSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "helios-voice".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Samples per uplink frame at the 24kHz wire rate
    pub frame_size: usize,
    /// "microphone", "none", or a path to a WAV file
    pub input: String,
    /// Play reply audio through the default output device
    pub playback: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            frame_size: DEFAULT_FRAME_SIZE,
            input: "microphone".to_string(),
            playback: true,
        }
    }
}

impl AudioConfig {
    pub fn source(&self) -> AudioSource {
        AudioSource::from_setting(&self.input)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub nats_url: String,
    pub subject_prefix: String,
    pub model: String,
    pub system_instruction: Option<String>,
    pub setup_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nats_url: "nats://localhost:4222".to_string(),
            subject_prefix: "helios.assistant".to_string(),
            model: "jarvis-live".to_string(),
            system_instruction: None,
            setup_timeout_ms: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub inactivity_timeout_secs: u64,
    pub log_capacity: usize,
    pub reconnect_delay_ms: u64,
    pub auto_reconnect: bool,
    pub mic_enabled: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: 60,
            log_capacity: DEFAULT_LOG_CAPACITY,
            reconnect_delay_ms: 2000,
            auto_reconnect: true,
            mic_enabled: true,
        }
    }
}

impl Config {
    /// Load from an optional file (any extension `config` understands)
    /// layered under `HELIOS__*` environment variables
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        settings
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            inactivity_timeout: Duration::from_secs(self.session.inactivity_timeout_secs),
            log_capacity: self.session.log_capacity,
            frame_size: self.audio.frame_size,
            capture: AudioBackendConfig::default(),
            mic_enabled: self.session.mic_enabled,
            muted: false,
        }
    }

    pub fn transport_config(&self) -> NatsTransportConfig {
        NatsTransportConfig {
            url: self.transport.nats_url.clone(),
            subject_prefix: self.transport.subject_prefix.clone(),
            model: self.transport.model.clone(),
            system_instruction: self.transport.system_instruction.clone(),
            setup_timeout: Duration::from_millis(self.transport.setup_timeout_ms),
        }
    }

    /// Delay used for restarts and automatic reconnection
    pub fn restart_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(Duration::from_millis(self.session.reconnect_delay_ms))
    }

    /// None when automatic reconnection is switched off
    pub fn reconnect_policy(&self) -> Option<ReconnectPolicy> {
        self.session.auto_reconnect.then(|| self.restart_policy())
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = Config::load("/nonexistent/helios-config").unwrap();
        assert_eq!(cfg.transport_config().setup_timeout, Duration::from_secs(5));
        assert_eq!(cfg.audio.frame_size, 4096);
        assert_eq!(cfg.session.inactivity_timeout_secs, 60);
        assert_eq!(cfg.session.log_capacity, 50);
        assert!(cfg.reconnect_policy().is_some());
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("helios.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "[transport]\nnats_url = \"nats://example:4222\"\n\n[session]\nauto_reconnect = false\ninactivity_timeout_secs = 5"
        )
        .unwrap();

        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.transport.nats_url, "nats://example:4222");
        assert!(cfg.reconnect_policy().is_none());
        assert_eq!(cfg.session_config().inactivity_timeout, Duration::from_secs(5));
        assert_eq!(cfg.service.http.port, 8787);
    }

    #[test]
    fn test_wire_rate_is_not_configurable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("helios.toml");
        std::fs::write(&path, "[audio]\nsample_rate = 16000\nframe_size = 2048\n").unwrap();

        // Older files may still carry a rate; it is ignored
        let cfg = Config::load(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.session_config().frame_size, 2048);
        assert_eq!(cfg.audio.frame_size, 2048);
    }
}
