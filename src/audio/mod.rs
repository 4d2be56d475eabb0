//! Audio data model and capture plumbing
//!
//! Frames flow from the active [`source::AudioSource`] through the
//! [`arbiter::MicrophoneArbiter`] to whichever operation currently holds the
//! capture lease.

pub mod arbiter;
pub mod capture;
pub mod source;

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{Error, Result};

/// Default sample rate for speech capture (16kHz)
pub const SAMPLE_RATE: u32 = 16_000;

/// A fixed block of interleaved signed 16-bit samples.
///
/// Immutable once produced; cloning shares the underlying sample block.
#[derive(Debug, Clone)]
pub struct AudioFrame {
    timestamp: DateTime<Utc>,
    sample_rate: u32,
    channels: u16,
    samples: Arc<[i16]>,
}

impl AudioFrame {
    /// Create a frame from interleaved samples, stamped with the current time
    #[must_use]
    pub fn new(sample_rate: u32, channels: u16, samples: Vec<i16>) -> Self {
        Self {
            timestamp: Utc::now(),
            sample_rate,
            channels,
            samples: samples.into(),
        }
    }

    /// Time at which the frame was produced
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Interleaved samples
    #[must_use]
    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Number of samples per channel
    #[must_use]
    pub fn samples_per_channel(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// A copy of this frame shortened to `per_channel` samples per channel
    ///
    /// Used to trim the final frame of a one-shot capture to the exact
    /// requested duration.
    #[must_use]
    pub fn truncated(&self, per_channel: usize) -> Self {
        let keep = (per_channel * usize::from(self.channels)).min(self.samples.len());
        Self {
            timestamp: self.timestamp,
            sample_rate: self.sample_rate,
            channels: self.channels,
            samples: self.samples[..keep].to_vec().into(),
        }
    }

    /// Interleaved samples as little-endian PCM bytes (realtime wire format)
    #[must_use]
    pub fn pcm_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for sample in self.samples.iter() {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }
}

/// An ordered, finalized sequence of frames covering a fixed duration.
///
/// Immutable once built; owned solely by the requester until consumed.
#[derive(Debug)]
pub struct CaptureClip {
    sample_rate: u32,
    channels: u16,
    frames: Vec<AudioFrame>,
}

impl CaptureClip {
    /// Finalize a clip from collected frames
    ///
    /// # Errors
    ///
    /// Returns [`Error::Audio`] if the frames do not share one sample rate
    /// and channel count.
    pub fn new(sample_rate: u32, channels: u16, frames: Vec<AudioFrame>) -> Result<Self> {
        for frame in &frames {
            if frame.sample_rate() != sample_rate || frame.channels() != channels {
                return Err(Error::Audio(format!(
                    "mixed frame format in clip: expected {sample_rate}Hz/{channels}ch, got {}Hz/{}ch",
                    frame.sample_rate(),
                    frame.channels()
                )));
            }
        }
        Ok(Self {
            sample_rate,
            channels,
            frames,
        })
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }

    /// Frames in production order
    #[must_use]
    pub fn frames(&self) -> &[AudioFrame] {
        &self.frames
    }

    /// Total samples per channel across all frames
    #[must_use]
    pub fn samples_per_channel(&self) -> usize {
        self.frames.iter().map(AudioFrame::samples_per_channel).sum()
    }

    /// Total samples across all channels
    #[must_use]
    pub fn total_samples(&self) -> usize {
        self.frames.iter().map(|f| f.samples().len()).sum()
    }

    /// Clip duration in seconds
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_secs(&self) -> f64 {
        self.samples_per_channel() as f64 / f64::from(self.sample_rate)
    }

    /// Encode the clip as 16-bit PCM WAV bytes for batch STT submission
    ///
    /// # Errors
    ///
    /// Returns error if WAV encoding fails
    pub fn to_wav(&self) -> Result<Vec<u8>> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| Error::Audio(e.to_string()))?;

            for frame in &self.frames {
                for &sample in frame.samples() {
                    writer
                        .write_sample(sample)
                        .map_err(|e| Error::Audio(e.to_string()))?;
                }
            }

            writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
        }

        Ok(cursor.into_inner())
    }
}
