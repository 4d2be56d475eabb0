//! Error types for the speech gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the speech gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Audio source cannot be opened (fatal to that source selection)
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Capture lease contention; reported to the caller, never retried here
    #[error("resource busy: {0}")]
    ResourceBusy(String),

    /// One-shot capture stalled before reaching its target sample count
    #[error("capture timeout: {0}")]
    CaptureTimeout(String),

    /// Lease contract violation (double release, use after release)
    #[error("invalid lease state: {0}")]
    InvalidLeaseState(String),

    /// Batch or realtime transcription backend failure
    #[error("transcription failed: {0}")]
    TranscriptionFailed(String),

    /// Reasoning/device-control backend failure
    #[error("upstream error: {0}")]
    UpstreamError(String),

    /// Audio encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
