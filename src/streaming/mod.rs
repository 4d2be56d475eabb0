//! Realtime streaming session lifecycle
//!
//! A [`StreamingSession`] owns the capture lease and the connection to the
//! realtime transcription service for its whole lifetime:
//!
//! ```text
//! Idle ──▶ Opening ──▶ Streaming ──▶ Closing ──▶ Closed
//!            │             │
//!            └──────┬──────┘
//!                   ▼
//!                 Failed
//! ```
//!
//! The state machine, not the caller, guarantees the lease is released
//! before `Closed` or `Failed` becomes observable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

use crate::audio::AudioFrame;
use crate::audio::arbiter::CaptureLease;
use crate::config::StreamingConfig;
use crate::services::{FrameSink, RealtimeTranscriber, TranscriptEvent};
use crate::{Error, Result};

/// Lifecycle state of a streaming session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session exists
    Idle,
    /// Lease held, handshake in flight
    Opening,
    /// Frames forwarded, events relayed
    Streaming,
    /// Draining in-flight frames, tearing down
    Closing,
    /// Terminal: normal end
    Closed,
    /// Terminal: handshake or service error
    Failed,
}

impl SessionState {
    /// Whether no further transitions can happen
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }
}

/// Why the streaming loop ended
enum LoopExit {
    Stopped,
    ServiceClosed,
    SourceClosed,
    CallerGone,
    Errored(String),
}

/// A live connection to the realtime transcription service.
///
/// Created in `Opening`, destroyed on close or error, never reused.
pub struct StreamingSession {
    session_id: String,
    state: Arc<watch::Sender<SessionState>>,
    stop: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    overruns: Arc<AtomicU64>,
}

impl StreamingSession {
    /// Drive `Opening` → `Streaming` against the realtime service.
    ///
    /// Returns the session handle plus the caller-facing event stream: lazy,
    /// infinite until [`stop`] is called or the session fails, delivering
    /// events in generation order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TranscriptionFailed`] when the handshake errors or
    /// times out; the lease is released before returning.
    ///
    /// [`stop`]: StreamingSession::stop
    pub async fn open(
        mut lease: CaptureLease,
        service: &dyn RealtimeTranscriber,
        config: &StreamingConfig,
        sample_rate: u32,
        channels: u16,
    ) -> Result<(Self, ReceiverStream<TranscriptEvent>)> {
        let state = Arc::new(watch::Sender::new(SessionState::Opening));
        tracing::debug!(lease = lease.id(), "realtime session opening");

        let connection =
            match tokio::time::timeout(config.handshake_timeout, service.open(sample_rate, channels))
                .await
            {
                Ok(Ok(connection)) => connection,
                Ok(Err(e)) => {
                    state.send_replace(SessionState::Failed);
                    let _ = lease.release();
                    return Err(e);
                }
                Err(_) => {
                    state.send_replace(SessionState::Failed);
                    let _ = lease.release();
                    return Err(Error::TranscriptionFailed(format!(
                        "realtime handshake timed out after {}ms",
                        config.handshake_timeout.as_millis()
                    )));
                }
            };

        let session_id = connection.session_id.clone();
        let mut frames = lease.subscribe()?;

        // Lossy relay between the pump and the outbound sink: the pump is
        // never blocked, and a lagging sink skips stale frames rather than
        // aborting the session.
        let (frame_tx, frame_rx) = broadcast::channel::<AudioFrame>(config.frame_buffer);
        let ingest = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                if frame_tx.send(frame).is_err() {
                    break;
                }
            }
        });

        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);
        let (stop_tx, stop_rx) = watch::channel(false);
        let overruns = Arc::new(AtomicU64::new(0));

        state.send_replace(SessionState::Streaming);
        tracing::info!(session_id = %session_id, lease = lease.id(), "realtime session streaming");

        let task = tokio::spawn(drive(
            lease,
            connection.sink,
            connection.events,
            frame_rx,
            event_tx,
            stop_rx,
            Arc::clone(&state),
            Arc::clone(&overruns),
            ingest,
            session_id.clone(),
        ));

        Ok((
            Self {
                session_id,
                state,
                stop: stop_tx,
                task: Some(task),
                overruns,
            },
            ReceiverStream::new(event_rx),
        ))
    }

    /// Session identifier issued by the external service
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Frames skipped so far due to outbound backpressure
    #[must_use]
    pub fn overrun_count(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Request termination and wait for the terminal state.
    ///
    /// Idempotent; a session that already reached a terminal state returns
    /// immediately. If teardown exceeds the grace period the driver is
    /// aborted; the abort is awaited so the lease is guaranteed released
    /// before a terminal state becomes observable.
    pub async fn stop(&mut self, grace: Duration) {
        let _ = self.stop.send(true);
        let Some(mut task) = self.task.take() else {
            return;
        };

        if tokio::time::timeout(grace, &mut task).await.is_err() {
            tracing::warn!(
                session_id = %self.session_id,
                grace_ms = grace.as_millis() as u64,
                "session teardown exceeded grace period, aborting"
            );
            task.abort();
            // Completes only once the aborted driver is dropped, and with
            // it the lease; the driver may also have finished on its own
            // and already published a terminal state.
            let _ = task.await;
            if !self.state.borrow().is_terminal() {
                self.state.send_replace(SessionState::Closed);
            }
        }
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        // Signal the driver; dropped stop sender also wakes it
        let _ = self.stop.send(true);
    }
}

/// Session driver: forwards frames, relays events, owns the lease.
///
/// Every exit path releases the lease before publishing a terminal state.
#[allow(clippy::too_many_arguments)]
async fn drive(
    mut lease: CaptureLease,
    mut sink: Box<dyn FrameSink>,
    mut events: mpsc::Receiver<TranscriptEvent>,
    mut frames: broadcast::Receiver<AudioFrame>,
    out: mpsc::Sender<TranscriptEvent>,
    mut stop: watch::Receiver<bool>,
    state: Arc<watch::Sender<SessionState>>,
    overruns: Arc<AtomicU64>,
    ingest: JoinHandle<()>,
    session_id: String,
) {
    let mut seq: u64 = 0;

    let exit = loop {
        tokio::select! {
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow_and_update() {
                    break LoopExit::Stopped;
                }
            }
            frame = frames.recv() => match frame {
                Ok(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        break LoopExit::Errored(e.to_string());
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    overruns.fetch_add(skipped, Ordering::Relaxed);
                    tracing::warn!(
                        session_id = %session_id,
                        skipped,
                        "streaming degraded: outbound channel lagging, stale frames dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => break LoopExit::SourceClosed,
            },
            event = events.recv() => match event {
                Some(TranscriptEvent::Error(reason)) => {
                    let _ = out.send(TranscriptEvent::Error(reason.clone())).await;
                    break LoopExit::Errored(reason);
                }
                Some(event) => {
                    seq += 1;
                    tracing::trace!(session_id = %session_id, seq, "relaying transcript event");
                    if out.send(event).await.is_err() {
                        break LoopExit::CallerGone;
                    }
                }
                None => break LoopExit::ServiceClosed,
            },
        }
    };

    let failed = matches!(exit, LoopExit::Errored(_));
    match exit {
        LoopExit::Stopped => {
            tracing::info!(session_id = %session_id, "session stop requested")
        }
        LoopExit::ServiceClosed => {
            tracing::info!(session_id = %session_id, "realtime service closed the session")
        }
        LoopExit::SourceClosed => {
            tracing::info!(session_id = %session_id, "audio source ended, closing session")
        }
        LoopExit::CallerGone => {
            tracing::debug!(session_id = %session_id, "event consumer dropped, closing session")
        }
        LoopExit::Errored(ref reason) => {
            tracing::error!(session_id = %session_id, reason = %reason, "session failed")
        }
    }

    state.send_replace(SessionState::Closing);
    ingest.abort();

    if !failed {
        // Drain in-flight frames and already-generated events
        while let Ok(frame) = frames.try_recv() {
            if sink.send(frame).await.is_err() {
                break;
            }
        }
        while let Ok(event) = events.try_recv() {
            seq += 1;
            if out.send(event).await.is_err() {
                break;
            }
        }
    }

    let _ = sink.close().await;
    if let Err(e) = lease.release() {
        tracing::error!(session_id = %session_id, error = %e, "lease release failed in teardown");
    }

    let terminal = if failed {
        SessionState::Failed
    } else {
        SessionState::Closed
    };
    state.send_replace(terminal);
    tracing::info!(session_id = %session_id, state = ?terminal, events = seq, "session terminated");
}
