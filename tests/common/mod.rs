//! In-process mock collaborators and audio plumbing for integration tests
//!
//! No audio hardware or network access required.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use speech_gateway::{
    AudioFrame, AudioSource, BatchTranscriber, CaptureClip, Collaborators, Config, Error,
    FramePump, FrameSink, LocalDeviceControl, MicrophoneArbiter, RealtimeConnection,
    RealtimeTranscriber, Reasoner, RemoteBridge, RemoteBridgeHandle, Result,
    SpeechServiceRouter, TranscriptEvent,
};

/// Batch backend returning a fixed transcript, recording what it saw
#[derive(Default)]
pub struct MockBatch {
    pub text: String,
    pub last_samples_per_channel: Mutex<Option<usize>>,
    pub last_total_samples: Mutex<Option<usize>>,
}

impl MockBatch {
    pub fn returning(text: &str) -> Arc<Self> {
        Arc::new(Self {
            text: text.to_string(),
            ..Self::default()
        })
    }
}

#[async_trait]
impl BatchTranscriber for MockBatch {
    async fn transcribe(&self, clip: &CaptureClip) -> Result<String> {
        *self.last_samples_per_channel.lock().unwrap() = Some(clip.samples_per_channel());
        *self.last_total_samples.lock().unwrap() = Some(clip.total_samples());
        Ok(self.text.clone())
    }
}

/// Realtime backend emitting a scripted event sequence, counting sent frames
#[derive(Default)]
pub struct MockRealtime {
    pub events: Vec<TranscriptEvent>,
    pub fail_handshake: bool,
    pub stall_handshake: bool,
    pub send_delay: Option<std::time::Duration>,
    pub stall_close: bool,
    pub opened: AtomicBool,
    pub frames_sent: Arc<AtomicUsize>,
}

impl MockRealtime {
    pub fn scripted(events: Vec<TranscriptEvent>) -> Arc<Self> {
        Arc::new(Self {
            events,
            ..Self::default()
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail_handshake: true,
            ..Self::default()
        })
    }

    /// A service whose handshake never completes
    pub fn unresponsive() -> Arc<Self> {
        Arc::new(Self {
            stall_handshake: true,
            ..Self::default()
        })
    }

    /// A service whose sink takes `delay` to accept each frame
    pub fn slow_sink(delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            send_delay: Some(delay),
            ..Self::default()
        })
    }

    /// A service whose sink never finishes closing
    pub fn hanging_close() -> Arc<Self> {
        Arc::new(Self {
            stall_close: true,
            ..Self::default()
        })
    }
}

#[async_trait]
impl RealtimeTranscriber for MockRealtime {
    async fn open(&self, _sample_rate: u32, _channels: u16) -> Result<RealtimeConnection> {
        if self.fail_handshake {
            return Err(Error::TranscriptionFailed(
                "scripted handshake failure".to_string(),
            ));
        }
        if self.stall_handshake {
            std::future::pending::<()>().await;
        }
        self.opened.store(true, Ordering::Relaxed);

        let (tx, rx) = mpsc::channel(16);
        let events = self.events.clone();
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
            // Keep the session open: a healthy service never closes on its own
            std::future::pending::<()>().await;
        });

        Ok(RealtimeConnection {
            session_id: "mock-session-1".to_string(),
            sink: Box::new(MockSink {
                frames_sent: Arc::clone(&self.frames_sent),
                send_delay: self.send_delay,
                stall_close: self.stall_close,
            }),
            events: rx,
        })
    }
}

struct MockSink {
    frames_sent: Arc<AtomicUsize>,
    send_delay: Option<std::time::Duration>,
    stall_close: bool,
}

#[async_trait]
impl FrameSink for MockSink {
    async fn send(&mut self, _frame: AudioFrame) -> Result<()> {
        if let Some(delay) = self.send_delay {
            tokio::time::sleep(delay).await;
        }
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if self.stall_close {
            std::future::pending::<()>().await;
        }
        Ok(())
    }
}

/// Reasoner returning a fixed answer (or an upstream failure), recording the
/// forwarded prompt
#[derive(Default)]
pub struct MockReasoner {
    pub answer: Option<String>,
    pub last_prompt: Mutex<Option<String>>,
}

impl MockReasoner {
    pub fn answering(answer: &str) -> Arc<Self> {
        Arc::new(Self {
            answer: Some(answer.to_string()),
            last_prompt: Mutex::new(None),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl Reasoner for MockReasoner {
    async fn complete(&self, prompt: &str) -> Result<String> {
        *self.last_prompt.lock().unwrap() = Some(prompt.to_string());
        self.answer.clone().ok_or_else(|| {
            Error::UpstreamError("reasoning service returned an empty response".to_string())
        })
    }
}

/// A router wired to the remote-bridge source and mock collaborators
pub struct TestGateway {
    pub router: SpeechServiceRouter,
    pub publisher: RemoteBridgeHandle,
    pub batch: Arc<MockBatch>,
    pub realtime: Arc<MockRealtime>,
    pub reasoner: Arc<MockReasoner>,
    _pump: FramePump,
}

pub async fn gateway(channels: u16, realtime: Arc<MockRealtime>) -> TestGateway {
    gateway_with_reasoner(channels, realtime, MockReasoner::answering("forty-two")).await
}

pub async fn gateway_with_reasoner(
    channels: u16,
    realtime: Arc<MockRealtime>,
    reasoner: Arc<MockReasoner>,
) -> TestGateway {
    gateway_tuned(channels, realtime, reasoner, |_| ()).await
}

/// Builder variant with a hook to adjust the config before wiring
pub async fn gateway_tuned(
    channels: u16,
    realtime: Arc<MockRealtime>,
    reasoner: Arc<MockReasoner>,
    tune: impl FnOnce(&mut Config),
) -> TestGateway {
    let mut config = Config::default();
    config.audio.channels = channels;
    config.audio.bridge_endpoint = Some("bridge://test/audio".to_string());
    tune(&mut config);

    let mut bridge = RemoteBridge::connect("bridge://test/audio").unwrap();
    let publisher = bridge.publisher();
    let frames = bridge.open().await.unwrap();

    let arbiter = MicrophoneArbiter::new();
    let pump = FramePump::spawn(frames, &arbiter);

    let batch = MockBatch::returning("hello world");

    let router = SpeechServiceRouter::new(
        arbiter,
        Collaborators {
            batch: batch.clone(),
            realtime: realtime.clone(),
            reasoner: reasoner.clone(),
            device: Arc::new(LocalDeviceControl::new()),
        },
        &config,
    );

    TestGateway {
        router,
        publisher,
        batch,
        realtime,
        reasoner,
        _pump: pump,
    }
}

/// Continuously push 100ms frames through the bridge
pub fn feed_frames(publisher: RemoteBridgeHandle, channels: u16) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let per_frame = 1600 * usize::from(channels);
        loop {
            if !publisher.push(AudioFrame::new(
                speech_gateway::SAMPLE_RATE,
                channels,
                vec![0i16; per_frame],
            )) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    })
}
