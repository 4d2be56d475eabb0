//! Configuration
//!
//! Built-in defaults, overlaid by an optional partial TOML file, overlaid by
//! environment variables for secrets and the bridge endpoint.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::Result;
use crate::audio::SAMPLE_RATE;
use crate::services::VoiceParameters;

/// Audio capture configuration
#[derive(Debug, Clone)]
pub struct AudioConfig {
    /// Capture sample rate in Hz
    pub sample_rate: u32,
    /// Capture channel count
    pub channels: u16,
    /// One-shot capture stall tolerance
    pub capture_grace: Duration,
    /// Remote robot-audio bridge endpoint; local microphone when unset
    pub bridge_endpoint: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            channels: 1,
            capture_grace: Duration::from_secs(2),
            bridge_endpoint: None,
        }
    }
}

/// Realtime session configuration
#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Handshake deadline for `Opening` → `Streaming`
    pub handshake_timeout: Duration,
    /// Teardown deadline for `Closing` → `Closed`
    pub stop_grace: Duration,
    /// Outbound frame buffer; overrun drops stale frames and logs degraded
    pub frame_buffer: usize,
    /// Caller-facing event buffer
    pub event_buffer: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(3),
            frame_buffer: 64,
            event_buffer: 256,
        }
    }
}

/// External service endpoints and credentials
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub batch_endpoint: String,
    pub batch_model: String,
    pub batch_api_key: String,
    pub realtime_endpoint: String,
    pub realtime_api_key: String,
    pub reasoning_endpoint: String,
    pub reasoning_model: String,
    pub reasoning_api_key: String,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            batch_endpoint: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            batch_model: "whisper-1".to_string(),
            batch_api_key: String::new(),
            realtime_endpoint: "wss://api.assemblyai.com/v2/realtime/ws".to_string(),
            realtime_api_key: String::new(),
            reasoning_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            reasoning_model: "gpt-4o-mini".to_string(),
            reasoning_api_key: String::new(),
        }
    }
}

/// Startup voice/device setup
#[derive(Debug, Clone)]
pub struct VoiceSetupConfig {
    /// Speaker volume applied at startup, 0.0 to 1.0
    pub output_volume: f32,
    /// Speech parameters applied when a robot device is attached
    pub parameters: VoiceParameters,
}

impl Default for VoiceSetupConfig {
    fn default() -> Self {
        Self {
            output_volume: 0.7,
            parameters: VoiceParameters::default(),
        }
    }
}

/// Gateway configuration
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub audio: AudioConfig,
    pub streaming: StreamingConfig,
    pub services: ServicesConfig,
    pub voice: VoiceSetupConfig,
}

impl Config {
    /// Load defaults, the optional TOML overlay, then env overrides.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(path) = path {
            let raw = std::fs::read_to_string(path)?;
            let file: ConfigFile = toml::from_str(&raw)?;
            config.apply_file(file);
            tracing::debug!(path = %path.display(), "config file applied");
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(audio) = file.audio {
            if let Some(v) = audio.sample_rate {
                self.audio.sample_rate = v;
            }
            if let Some(v) = audio.channels {
                self.audio.channels = v;
            }
            if let Some(v) = audio.capture_grace_ms {
                self.audio.capture_grace = Duration::from_millis(v);
            }
            if audio.bridge_endpoint.is_some() {
                self.audio.bridge_endpoint = audio.bridge_endpoint;
            }
        }
        if let Some(streaming) = file.streaming {
            if let Some(v) = streaming.handshake_timeout_ms {
                self.streaming.handshake_timeout = Duration::from_millis(v);
            }
            if let Some(v) = streaming.stop_grace_ms {
                self.streaming.stop_grace = Duration::from_millis(v);
            }
            // Channel capacities must be at least 1
            if let Some(v) = streaming.frame_buffer {
                self.streaming.frame_buffer = v.max(1);
            }
            if let Some(v) = streaming.event_buffer {
                self.streaming.event_buffer = v.max(1);
            }
        }
        if let Some(services) = file.services {
            if let Some(v) = services.batch_endpoint {
                self.services.batch_endpoint = v;
            }
            if let Some(v) = services.batch_model {
                self.services.batch_model = v;
            }
            if let Some(v) = services.realtime_endpoint {
                self.services.realtime_endpoint = v;
            }
            if let Some(v) = services.reasoning_endpoint {
                self.services.reasoning_endpoint = v;
            }
            if let Some(v) = services.reasoning_model {
                self.services.reasoning_model = v;
            }
        }
        if let Some(voice) = file.voice {
            if let Some(v) = voice.output_volume {
                self.voice.output_volume = v;
            }
            if let Some(v) = voice.parameters {
                self.voice.parameters = v;
            }
        }
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SPEECHD_BRIDGE_ENDPOINT")
            && !v.is_empty()
        {
            self.audio.bridge_endpoint = Some(v);
        }
        if let Ok(v) = std::env::var("SPEECHD_BATCH_API_KEY") {
            self.services.batch_api_key = v;
        }
        if let Ok(v) = std::env::var("SPEECHD_REALTIME_API_KEY") {
            self.services.realtime_api_key = v;
        }
        if let Ok(v) = std::env::var("SPEECHD_REASONING_API_KEY") {
            self.services.reasoning_api_key = v;
        }
    }
}

/// Partial TOML overlay; every field is optional
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    audio: Option<AudioFileConfig>,
    streaming: Option<StreamingFileConfig>,
    services: Option<ServicesFileConfig>,
    voice: Option<VoiceFileConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct AudioFileConfig {
    sample_rate: Option<u32>,
    channels: Option<u16>,
    capture_grace_ms: Option<u64>,
    bridge_endpoint: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamingFileConfig {
    handshake_timeout_ms: Option<u64>,
    stop_grace_ms: Option<u64>,
    frame_buffer: Option<usize>,
    event_buffer: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct ServicesFileConfig {
    batch_endpoint: Option<String>,
    batch_model: Option<String>,
    realtime_endpoint: Option<String>,
    reasoning_endpoint: Option<String>,
    reasoning_model: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct VoiceFileConfig {
    output_volume: Option<f32>,
    parameters: Option<VoiceParameters>,
}
