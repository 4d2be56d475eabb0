//! Device control collaborator
//!
//! The robot's output volume, microphone toggle, and voice parameters are
//! managed by an external device-control subsystem; the core only needs
//! success/failure signaling. [`LocalDeviceControl`] stands in when no robot
//! is attached.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::Deserialize;

use crate::Result;

/// Speech synthesis parameters applied through device control at startup
#[derive(Debug, Clone, Deserialize)]
pub struct VoiceParameters {
    /// 1 = deep, 2 = high
    pub pitch_shift: f32,
    /// Speaking speed in words per minute
    pub speed: f32,
    pub double_voice_level: f32,
    pub double_voice_time_shift: f32,
}

impl Default for VoiceParameters {
    fn default() -> Self {
        Self {
            pitch_shift: 1.0,
            speed: 120.0,
            double_voice_level: 0.0,
            double_voice_time_shift: 0.0,
        }
    }
}

/// Device control subsystem contract
#[async_trait]
pub trait DeviceControl: Send + Sync {
    /// Set speaker output volume, 0.0 to 1.0
    async fn set_output_volume(&self, volume: f32) -> Result<()>;

    /// Enable audio capture hardware
    async fn enable_mic(&self) -> Result<()>;

    /// Disable audio capture hardware
    async fn disable_mic(&self) -> Result<()>;

    /// Apply speech synthesis parameters
    async fn set_voice_parameters(&self, params: &VoiceParameters) -> Result<()>;

    /// Whether the device is currently speaking (TTS in progress).
    ///
    /// Capture consumers can consult this to avoid transcribing the device's
    /// own speech.
    fn is_talking(&self) -> bool;
}

/// No-robot device control: acknowledges commands and tracks speaking state
/// in-process.
#[derive(Default)]
pub struct LocalDeviceControl {
    talking: AtomicBool,
}

impl LocalDeviceControl {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Update speaking state from a TTS status callback.
    ///
    /// `done` means the utterance finished.
    pub fn set_talking(&self, talking: bool) {
        self.talking.store(talking, Ordering::Relaxed);
    }
}

#[async_trait]
impl DeviceControl for LocalDeviceControl {
    async fn set_output_volume(&self, volume: f32) -> Result<()> {
        tracing::debug!(volume, "output volume set (no device attached)");
        Ok(())
    }

    async fn enable_mic(&self) -> Result<()> {
        tracing::info!("microphone enabled");
        Ok(())
    }

    async fn disable_mic(&self) -> Result<()> {
        tracing::info!("microphone disabled");
        Ok(())
    }

    async fn set_voice_parameters(&self, params: &VoiceParameters) -> Result<()> {
        tracing::debug!(
            pitch_shift = params.pitch_shift,
            speed = params.speed,
            "voice parameters set (no device attached)"
        );
        Ok(())
    }

    fn is_talking(&self) -> bool {
        self.talking.load(Ordering::Relaxed)
    }
}
