//! Caller-facing speech operations
//!
//! The router arbitrates one-shot transcription, realtime streaming, and
//! question answering against the single capture resource. First come,
//! first served: an operation that cannot take the lease immediately fails
//! with `ResourceBusy` instead of queueing behind a different kind.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_stream::wrappers::ReceiverStream;

use crate::audio::arbiter::MicrophoneArbiter;
use crate::audio::capture::CaptureBuffer;
use crate::config::{Config, StreamingConfig};
use crate::services::{
    BatchTranscriber, DeviceControl, Reasoner, RealtimeTranscriber, TranscriptEvent,
};
use crate::streaming::{SessionState, StreamingSession};
use crate::{Error, Result};

/// External collaborators the router drives
pub struct Collaborators {
    pub batch: Arc<dyn BatchTranscriber>,
    pub realtime: Arc<dyn RealtimeTranscriber>,
    pub reasoner: Arc<dyn Reasoner>,
    pub device: Arc<dyn DeviceControl>,
}

/// The gateway's service surface
pub struct SpeechServiceRouter {
    arbiter: MicrophoneArbiter,
    capture: CaptureBuffer,
    collaborators: Collaborators,
    streaming: StreamingConfig,
    sample_rate: u32,
    channels: u16,
    stop_grace: Duration,
    session: Mutex<Option<StreamingSession>>,
}

impl SpeechServiceRouter {
    #[must_use]
    pub fn new(
        arbiter: MicrophoneArbiter,
        collaborators: Collaborators,
        config: &Config,
    ) -> Self {
        Self {
            arbiter,
            capture: CaptureBuffer::new(&config.audio),
            collaborators,
            streaming: config.streaming.clone(),
            sample_rate: config.audio.sample_rate,
            channels: config.audio.channels,
            stop_grace: config.streaming.stop_grace,
            session: Mutex::new(None),
        }
    }

    /// The arbiter guarding the capture resource
    #[must_use]
    pub fn arbiter(&self) -> &MicrophoneArbiter {
        &self.arbiter
    }

    /// Capture audio for `duration` and transcribe it in one shot.
    ///
    /// # Errors
    ///
    /// Fails immediately with [`Error::ResourceBusy`] if another operation
    /// holds the capture lease; with [`Error::CaptureTimeout`] if the source
    /// stalls; with [`Error::TranscriptionFailed`] if the batch backend
    /// rejects the clip.
    pub async fn transcribe_once(&self, duration: Duration) -> Result<String> {
        let lease = self.arbiter.try_acquire()?;
        let clip = self.capture.collect(lease, duration).await?;
        self.collaborators.batch.transcribe(&clip).await
    }

    /// Open a realtime transcription session.
    ///
    /// The returned stream is lazy and infinite until
    /// [`stop_realtime_transcription`] is called or the session fails;
    /// events arrive in generation order.
    ///
    /// # Errors
    ///
    /// Fails immediately with [`Error::ResourceBusy`] if a capture or an
    /// earlier session holds the lease, and with
    /// [`Error::TranscriptionFailed`] if the service handshake fails — no
    /// session is created and no frames are consumed in either case.
    ///
    /// [`stop_realtime_transcription`]: SpeechServiceRouter::stop_realtime_transcription
    pub async fn start_realtime_transcription(
        &self,
    ) -> Result<ReceiverStream<TranscriptEvent>> {
        let mut slot = self.session.lock().await;
        if let Some(session) = slot.as_ref() {
            if session.state().is_terminal() {
                *slot = None;
            } else {
                return Err(Error::ResourceBusy(format!(
                    "realtime session {} already active",
                    session.session_id()
                )));
            }
        }

        let lease = self.arbiter.try_acquire()?;
        let (session, events) = StreamingSession::open(
            lease,
            self.collaborators.realtime.as_ref(),
            &self.streaming,
            self.sample_rate,
            self.channels,
        )
        .await?;

        *slot = Some(session);
        Ok(events)
    }

    /// Stop the active realtime session, if any. Idempotent.
    pub async fn stop_realtime_transcription(&self) {
        let mut slot = self.session.lock().await;
        if let Some(mut session) = slot.take() {
            session.stop(self.stop_grace).await;
        } else {
            tracing::debug!("stop requested with no active session");
        }
    }

    /// State of the current session, `Idle` when none exists
    pub async fn session_state(&self) -> SessionState {
        self.session
            .lock()
            .await
            .as_ref()
            .map_or(SessionState::Idle, StreamingSession::state)
    }

    /// Frames the current session has skipped under outbound backpressure,
    /// zero when no session exists
    pub async fn session_overrun_count(&self) -> u64 {
        self.session
            .lock()
            .await
            .as_ref()
            .map_or(0, StreamingSession::overrun_count)
    }

    /// Forward a question verbatim to the reasoning backend.
    ///
    /// Does not touch the audio subsystem.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpstreamError`] on any backend failure.
    pub async fn ask_question(&self, question: &str) -> Result<String> {
        self.collaborators.reasoner.complete(question).await
    }

    /// Toggle the capture hardware through device control.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UpstreamError`] if the device-control subsystem
    /// reports failure.
    pub async fn set_microphone_enabled(&self, enabled: bool) -> Result<()> {
        if enabled {
            self.collaborators.device.enable_mic().await
        } else {
            self.collaborators.device.disable_mic().await
        }
    }

    /// Whether the device is currently speaking
    #[must_use]
    pub fn is_device_talking(&self) -> bool {
        self.collaborators.device.is_talking()
    }
}
