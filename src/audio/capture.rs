//! One-shot fixed-duration capture

use std::time::Duration;

use crate::audio::arbiter::CaptureLease;
use crate::audio::{AudioFrame, CaptureClip};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Collects exactly one clip of a requested duration under a capture lease.
///
/// Bounded in time (grace interval per frame) and memory (frame vector
/// pre-sized for the target duration); the lease is released on every exit
/// path, success or failure.
pub struct CaptureBuffer {
    sample_rate: u32,
    channels: u16,
    grace: Duration,
}

impl CaptureBuffer {
    #[must_use]
    pub const fn new(config: &AudioConfig) -> Self {
        Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            grace: config.capture_grace,
        }
    }

    /// Collect `duration` worth of audio from the active source.
    ///
    /// On success the clip holds exactly `duration * sample_rate` samples
    /// per channel; the final frame is trimmed if the source overshoots.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CaptureTimeout`] if the source stalls for longer
    /// than the grace interval before the target is reached, and
    /// [`Error::DeviceUnavailable`] if the source closes mid-capture. The
    /// lease is released before either error is returned.
    pub async fn collect(
        &self,
        mut lease: CaptureLease,
        duration: Duration,
    ) -> Result<CaptureClip> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let target = (duration.as_secs_f64() * f64::from(self.sample_rate)) as usize;
        if target == 0 {
            lease.release()?;
            return Err(Error::CaptureTimeout(
                "requested capture duration is zero".to_string(),
            ));
        }

        let mut rx = lease.subscribe()?;

        tracing::info!(
            lease = lease.id(),
            duration_ms = duration.as_millis() as u64,
            target_samples = target,
            "one-shot capture started"
        );

        // Typical frame granularity is well under 100ms; reserve generously.
        let mut frames: Vec<AudioFrame> =
            Vec::with_capacity(target / (usize::try_from(self.sample_rate).unwrap_or(1) / 100).max(1) + 1);
        let mut collected = 0usize;

        while collected < target {
            match tokio::time::timeout(self.grace, rx.recv()).await {
                Ok(Some(frame)) => {
                    if frame.sample_rate() != self.sample_rate
                        || frame.channels() != self.channels
                    {
                        let _ = lease.release();
                        return Err(Error::Audio(format!(
                            "unexpected frame format {}Hz/{}ch",
                            frame.sample_rate(),
                            frame.channels()
                        )));
                    }
                    collected += frame.samples_per_channel();
                    frames.push(frame);
                }
                Ok(None) => {
                    let _ = lease.release();
                    return Err(Error::DeviceUnavailable(
                        "audio source closed mid-capture".to_string(),
                    ));
                }
                Err(_) => {
                    let _ = lease.release();
                    return Err(Error::CaptureTimeout(format!(
                        "no frames for {}ms with {collected}/{target} samples collected",
                        self.grace.as_millis()
                    )));
                }
            }
        }

        // Trim overshoot so the clip covers exactly the requested duration
        if collected > target {
            let excess = collected - target;
            if let Some(last) = frames.pop() {
                let keep = last.samples_per_channel().saturating_sub(excess);
                if keep > 0 {
                    frames.push(last.truncated(keep));
                }
            }
        }

        lease.release()?;

        let clip = CaptureClip::new(self.sample_rate, self.channels, frames)?;
        tracing::info!(
            samples_per_channel = clip.samples_per_channel(),
            duration_secs = clip.duration_secs(),
            "one-shot capture complete"
        );
        Ok(clip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;
    use crate::audio::arbiter::MicrophoneArbiter;
    use crate::audio::source::{AudioSource, FramePump, RemoteBridge};

    fn buffer(channels: u16, grace_ms: u64) -> CaptureBuffer {
        CaptureBuffer {
            sample_rate: SAMPLE_RATE,
            channels,
            grace: Duration::from_millis(grace_ms),
        }
    }

    async fn pumped(
        arbiter: &MicrophoneArbiter,
    ) -> (crate::audio::source::RemoteBridgeHandle, FramePump) {
        let mut bridge = RemoteBridge::connect("bridge://test").unwrap();
        let publisher = bridge.publisher();
        let pump = FramePump::spawn(bridge.open().await.unwrap(), arbiter);
        (publisher, pump)
    }

    #[tokio::test]
    async fn collects_exact_sample_count() {
        let arbiter = MicrophoneArbiter::new();
        let (publisher, pump) = pumped(&arbiter).await;
        let lease = arbiter.try_acquire().unwrap();

        let feeder = tokio::spawn(async move {
            // 20 frames of 100ms stereo: double the 1s target
            for _ in 0..20 {
                publisher.push(AudioFrame::new(SAMPLE_RATE, 2, vec![0i16; 3200]));
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        });

        let clip = buffer(2, 500)
            .collect(lease, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(clip.samples_per_channel(), 16_000);
        assert_eq!(clip.total_samples(), 32_000);
        feeder.await.unwrap();
        pump.shutdown();
    }

    #[tokio::test]
    async fn trims_overshooting_final_frame() {
        let arbiter = MicrophoneArbiter::new();
        let (publisher, pump) = pumped(&arbiter).await;
        let lease = arbiter.try_acquire().unwrap();

        // One 200ms frame against a 150ms target
        publisher.push(AudioFrame::new(SAMPLE_RATE, 1, vec![0i16; 3200]));

        let clip = buffer(1, 500)
            .collect(lease, Duration::from_millis(150))
            .await
            .unwrap();

        assert_eq!(clip.samples_per_channel(), 2400);
        pump.shutdown();
    }

    #[tokio::test]
    async fn stalled_source_times_out_and_releases_lease() {
        let arbiter = MicrophoneArbiter::new();
        let (_publisher, pump) = pumped(&arbiter).await;
        let lease = arbiter.try_acquire().unwrap();

        let err = buffer(1, 50)
            .collect(lease, Duration::from_secs(1))
            .await;
        assert!(matches!(err, Err(Error::CaptureTimeout(_))));

        // Lease must not leak on the timeout path
        assert!(arbiter.try_acquire().is_ok());
        pump.shutdown();
    }

    #[tokio::test]
    async fn closed_source_surfaces_device_unavailable() {
        let arbiter = MicrophoneArbiter::new();
        let mut bridge = RemoteBridge::connect("bridge://test").unwrap();
        let publisher = bridge.publisher();
        let pump = FramePump::spawn(bridge.open().await.unwrap(), &arbiter);
        let lease = arbiter.try_acquire().unwrap();

        publisher.push(AudioFrame::new(SAMPLE_RATE, 1, vec![0i16; 160]));
        drop(publisher);
        bridge.close();

        let err = buffer(1, 200)
            .collect(lease, Duration::from_secs(1))
            .await;
        // Pump exits when the bridge closes, dropping the tap sender
        assert!(matches!(
            err,
            Err(Error::DeviceUnavailable(_) | Error::CaptureTimeout(_))
        ));
        assert!(arbiter.try_acquire().is_ok());
        pump.shutdown();
    }
}
