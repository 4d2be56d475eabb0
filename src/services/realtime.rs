//! Realtime speech-to-text over WebSocket
//!
//! AssemblyAI-style wire shape: a session-begins message carrying the
//! external session id, JSON partial/final transcript messages downstream,
//! binary PCM frames upstream, and a terminate message on close.

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::audio::AudioFrame;
use crate::services::{FrameSink, RealtimeConnection, RealtimeTranscriber, TranscriptEvent};
use crate::{Error, Result};

/// Inbound event buffer between the reader task and the session driver
const EVENT_BUFFER: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Messages the realtime service sends downstream
#[derive(Debug, Deserialize)]
struct ServerMessage {
    message_type: Option<String>,
    session_id: Option<String>,
    text: Option<String>,
    error: Option<String>,
}

impl ServerMessage {
    fn into_event(self) -> Option<TranscriptEvent> {
        if let Some(error) = self.error {
            return Some(TranscriptEvent::Error(error));
        }
        let text = self.text.unwrap_or_default();
        // The service emits empty interim results while listening; skip them
        if text.is_empty() {
            return None;
        }
        match self.message_type.as_deref() {
            Some("PartialTranscript") => Some(TranscriptEvent::Partial(text)),
            Some("FinalTranscript") => Some(TranscriptEvent::Final(text)),
            _ => None,
        }
    }
}

/// WebSocket realtime transcription client
pub struct WsRealtimeTranscriber {
    endpoint: String,
    api_key: String,
}

impl WsRealtimeTranscriber {
    /// Create a realtime STT client
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing
    pub fn new(endpoint: String, api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "realtime transcription API key required".to_string(),
            ));
        }
        Ok(Self { endpoint, api_key })
    }
}

#[async_trait]
impl RealtimeTranscriber for WsRealtimeTranscriber {
    async fn open(&self, sample_rate: u32, channels: u16) -> Result<RealtimeConnection> {
        let url = format!(
            "{}?sample_rate={sample_rate}&channels={channels}",
            self.endpoint
        );
        let mut request = url
            .into_client_request()
            .map_err(|e| Error::TranscriptionFailed(format!("bad realtime endpoint: {e}")))?;
        request.headers_mut().insert(
            "Authorization",
            HeaderValue::from_str(&self.api_key)
                .map_err(|e| Error::TranscriptionFailed(e.to_string()))?,
        );

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| Error::TranscriptionFailed(format!("handshake failed: {e}")))?;
        let (write, mut read) = ws.split();

        // The service confirms the session before any transcripts flow
        let session_id = loop {
            match read.next().await {
                Some(Ok(Message::Text(raw))) => {
                    let msg: ServerMessage = serde_json::from_str(&raw).map_err(|e| {
                        Error::TranscriptionFailed(format!("malformed handshake: {e}"))
                    })?;
                    if let Some(error) = msg.error {
                        return Err(Error::TranscriptionFailed(error));
                    }
                    if msg.message_type.as_deref() == Some("SessionBegins") {
                        break msg
                            .session_id
                            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                    }
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(Error::TranscriptionFailed(format!(
                        "handshake read failed: {e}"
                    )));
                }
                None => {
                    return Err(Error::TranscriptionFailed(
                        "connection closed during handshake".to_string(),
                    ));
                }
            }
        };

        tracing::info!(session_id = %session_id, "realtime session opened");

        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(async move {
            while let Some(message) = read.next().await {
                match message {
                    Ok(Message::Text(raw)) => match serde_json::from_str::<ServerMessage>(&raw) {
                        Ok(msg) => {
                            if let Some(event) = msg.into_event()
                                && event_tx.send(event).await.is_err()
                            {
                                break;
                            }
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "unparseable realtime message");
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx
                            .send(TranscriptEvent::Error(e.to_string()))
                            .await;
                        break;
                    }
                }
            }
            tracing::debug!("realtime reader task finished");
        });

        Ok(RealtimeConnection {
            session_id,
            sink: Box::new(WsFrameSink { write }),
            events: event_rx,
        })
    }
}

/// Outbound half of the WebSocket session
struct WsFrameSink {
    write: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: AudioFrame) -> Result<()> {
        self.write
            .send(Message::Binary(frame.pcm_bytes()))
            .await
            .map_err(|e| Error::TranscriptionFailed(format!("frame send failed: {e}")))
    }

    async fn close(&mut self) -> Result<()> {
        let terminate = json!({"terminate_session": true}).to_string();
        // Best effort: the connection may already be gone
        let _ = self.write.send(Message::Text(terminate)).await;
        let _ = self.write.close().await;
        Ok(())
    }
}
