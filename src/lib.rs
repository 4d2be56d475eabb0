//! Speech Gateway - audio capture and speech-service orchestration for
//! voice-interactive agents
//!
//! The gateway captures audio from whichever input source is available,
//! routes it to speech backends, and serializes concurrent consumers
//! against the single physical microphone.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                AudioSource                       │
//! │     LocalMicrophone  │  RemoteBridge             │
//! └─────────────────────┬────────────────────────────┘
//!                       │ FramePump
//! ┌─────────────────────▼────────────────────────────┐
//! │             MicrophoneArbiter                    │
//! │           (exclusive CaptureLease)               │
//! └─────────┬───────────────────────────┬────────────┘
//!           │                           │
//! ┌─────────▼──────────┐   ┌────────────▼────────────┐
//! │   CaptureBuffer    │   │    StreamingSession     │
//! │  (one-shot clip)   │   │  (realtime transcripts) │
//! └─────────┬──────────┘   └────────────┬────────────┘
//!           │                           │
//! ┌─────────▼───────────────────────────▼────────────┐
//! │            SpeechServiceRouter                   │
//! │  transcribe_once │ realtime │ ask │ mic toggle   │
//! └──────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod error;
pub mod router;
pub mod services;
pub mod streaming;

pub use audio::arbiter::{CaptureLease, MicrophoneArbiter};
pub use audio::capture::CaptureBuffer;
pub use audio::source::{
    AudioSource, AudioSourceHandle, FramePump, LocalMicrophone, RemoteBridge,
    RemoteBridgeHandle, SelectedSource, select_source,
};
pub use audio::{AudioFrame, CaptureClip, SAMPLE_RATE};
pub use config::Config;
pub use error::{Error, Result};
pub use router::{Collaborators, SpeechServiceRouter};
pub use services::{
    BatchTranscriber, DeviceControl, FrameSink, HttpBatchTranscriber, HttpReasoner,
    LocalDeviceControl, RealtimeConnection, RealtimeTranscriber, Reasoner, TranscriptEvent,
    VoiceParameters, WsRealtimeTranscriber,
};
pub use streaming::{SessionState, StreamingSession};
