//! External collaborator contracts
//!
//! The gateway core only depends on these traits; the submodules carry one
//! reference implementation each (HTTP batch STT, WebSocket realtime STT,
//! HTTP reasoning, device control).

mod batch;
mod device;
mod realtime;
mod reasoning;

pub use batch::HttpBatchTranscriber;
pub use device::{DeviceControl, LocalDeviceControl, VoiceParameters};
pub use realtime::WsRealtimeTranscriber;
pub use reasoning::HttpReasoner;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::Result;
use crate::audio::{AudioFrame, CaptureClip};

/// Incremental transcription result.
///
/// Partials may be superseded by later partials or a final; delivery order
/// within one session is the order the service generated them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    /// Incremental text, may be superseded
    Partial(String),
    /// Settled text for the utterance
    Final(String),
    /// Service-side failure, terminal for the session
    Error(String),
}

/// Synchronous clip-in, text-out transcription backend
#[async_trait]
pub trait BatchTranscriber: Send + Sync {
    /// Transcribe a finalized clip. May take seconds.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TranscriptionFailed`] on any backend failure.
    async fn transcribe(&self, clip: &CaptureClip) -> Result<String>;
}

/// Outbound half of an open realtime session
#[async_trait]
pub trait FrameSink: Send {
    /// Forward one frame to the service
    async fn send(&mut self, frame: AudioFrame) -> Result<()>;

    /// Terminate the session and tear down the connection
    async fn close(&mut self) -> Result<()>;
}

/// An established bidirectional realtime transcription session
pub struct RealtimeConnection {
    /// Session identifier issued by the external service
    pub session_id: String,
    /// Outbound frame path
    pub sink: Box<dyn FrameSink>,
    /// Inbound results, closed by the service on its own teardown
    pub events: mpsc::Receiver<TranscriptEvent>,
}

/// Streaming transcription backend
#[async_trait]
pub trait RealtimeTranscriber: Send + Sync {
    /// Perform the connection handshake and open a session
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::TranscriptionFailed`] if the handshake fails.
    async fn open(&self, sample_rate: u32, channels: u16) -> Result<RealtimeConnection>;
}

/// Question-answering backend
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Forward a prompt verbatim and return the first response
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::UpstreamError`] on any failure, including a
    /// malformed or empty response; never partially returns.
    async fn complete(&self, prompt: &str) -> Result<String>;
}
