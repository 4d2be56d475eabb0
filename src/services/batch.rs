//! Batch speech-to-text over HTTP
//!
//! Whisper-style multipart upload: the clip is WAV-encoded and submitted in
//! one request; the response carries the full transcript.

use async_trait::async_trait;

use crate::audio::CaptureClip;
use crate::services::BatchTranscriber;
use crate::{Error, Result};

/// Response shape of Whisper-compatible transcription endpoints
#[derive(serde::Deserialize)]
struct TranscriptionResponse {
    text: String,
}

/// HTTP batch transcription client
pub struct HttpBatchTranscriber {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl HttpBatchTranscriber {
    /// Create a batch STT client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(endpoint: String, api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "batch transcription API key required".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            model,
        })
    }
}

#[async_trait]
impl BatchTranscriber for HttpBatchTranscriber {
    async fn transcribe(&self, clip: &CaptureClip) -> Result<String> {
        let wav = clip.to_wav()?;
        tracing::debug!(
            audio_bytes = wav.len(),
            duration_secs = clip.duration_secs(),
            "submitting clip for batch transcription"
        );

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(wav)
                    .file_name("clip.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::TranscriptionFailed(e.to_string()))?,
            )
            .text("model", self.model.clone());

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "batch transcription request failed");
                Error::TranscriptionFailed(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "batch transcription API error");
            return Err(Error::TranscriptionFailed(format!(
                "batch STT error {status}: {body}"
            )));
        }

        let result: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| Error::TranscriptionFailed(format!("malformed response: {e}")))?;

        tracing::info!(transcript = %result.text, "batch transcription complete");
        Ok(result.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_api_key() {
        let err = HttpBatchTranscriber::new(
            "https://stt.example/v1/transcriptions".to_string(),
            String::new(),
            "whisper-1".to_string(),
        );
        assert!(matches!(err, Err(Error::Config(_))));
    }

    #[test]
    fn parses_response_shape() {
        let parsed: TranscriptionResponse =
            serde_json::from_str(r#"{"text":"hello world"}"#).unwrap();
        assert_eq!(parsed.text, "hello world");
    }
}
