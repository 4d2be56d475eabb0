//! Audio sources and the frame pump
//!
//! Exactly one source variant is active per process: the local microphone,
//! or the remote robot-audio bridge when one is configured. Selection
//! happens once at startup; switching requires a full stop/start cycle.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::audio::AudioFrame;
use crate::audio::arbiter::{MicrophoneArbiter, TapSlot};
use crate::config::AudioConfig;
use crate::{Error, Result};

/// Poll interval for the local capture thread's shutdown flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// How long to wait for the local capture thread to report readiness
const OPEN_TIMEOUT: Duration = Duration::from_secs(3);

/// Identifies which source variant is active process-wide
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSourceHandle {
    /// Hardware capture device on this machine
    Local,
    /// Frames relayed from a remote robot-audio subsystem
    Remote,
}

impl std::fmt::Display for AudioSourceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local microphone"),
            Self::Remote => write!(f, "remote bridge"),
        }
    }
}

/// A continuous producer of [`AudioFrame`]s
#[async_trait]
pub trait AudioSource: Send {
    /// Which variant this is
    fn handle(&self) -> AudioSourceHandle;

    /// Start producing frames.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if the hardware or bridge cannot
    /// be reached, or if the source was already opened.
    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<AudioFrame>>;

    /// Release all device resources. Idempotent.
    fn close(&mut self);
}

/// Local hardware microphone, wrapped behind a dedicated capture thread.
///
/// cpal streams are not `Send`, so the stream lives on its own thread; the
/// thread converts callback buffers into frames and exits when [`close`]
/// sets the shutdown flag and joins it.
///
/// [`close`]: AudioSource::close
pub struct LocalMicrophone {
    sample_rate: u32,
    channels: u16,
    shutdown: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl LocalMicrophone {
    /// Probe the default input device and prepare a capture source
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if no input device exists.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host.default_input_device().ok_or_else(|| {
            Error::DeviceUnavailable("no input device available".to_string())
        })?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = config.sample_rate,
            channels = config.channels,
            "local microphone selected"
        );

        Ok(Self {
            sample_rate: config.sample_rate,
            channels: config.channels,
            shutdown: Arc::new(AtomicBool::new(false)),
            thread: None,
        })
    }

    fn run_capture(
        sample_rate: u32,
        channels: u16,
        frames: mpsc::UnboundedSender<AudioFrame>,
        ready: oneshot::Sender<Result<()>>,
        shutdown: Arc<AtomicBool>,
    ) {
        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            let _ = ready.send(Err(Error::DeviceUnavailable(
                "input device disappeared before open".to_string(),
            )));
            return;
        };

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::DeviceUnavailable(e.to_string()))
            .and_then(|mut configs| {
                configs
                    .find(|c| {
                        c.channels() == channels
                            && c.min_sample_rate() <= SampleRate(sample_rate)
                            && c.max_sample_rate() >= SampleRate(sample_rate)
                    })
                    .ok_or_else(|| {
                        Error::DeviceUnavailable(format!(
                            "no {sample_rate}Hz/{channels}ch input config"
                        ))
                    })
            });

        let stream_config = match supported {
            Ok(c) => c.with_sample_rate(SampleRate(sample_rate)).config(),
            Err(e) => {
                let _ = ready.send(Err(e));
                return;
            }
        };

        let stream = device.build_input_stream(
            &stream_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                #[allow(clippy::cast_possible_truncation)]
                let samples: Vec<i16> = data
                    .iter()
                    .map(|s| (s * 32767.0).clamp(-32768.0, 32767.0) as i16)
                    .collect();
                let _ = frames.send(AudioFrame::new(sample_rate, channels, samples));
            },
            |err| {
                tracing::error!(error = %err, "local capture error");
            },
            None,
        );

        match stream {
            Ok(stream) => {
                if let Err(e) = stream.play() {
                    let _ = ready.send(Err(Error::DeviceUnavailable(e.to_string())));
                    return;
                }
                let _ = ready.send(Ok(()));
                while !shutdown.load(Ordering::Relaxed) {
                    std::thread::sleep(SHUTDOWN_POLL);
                }
                drop(stream);
                tracing::debug!("local capture thread stopped");
            }
            Err(e) => {
                let _ = ready.send(Err(Error::DeviceUnavailable(e.to_string())));
            }
        }
    }
}

#[async_trait]
impl AudioSource for LocalMicrophone {
    fn handle(&self) -> AudioSourceHandle {
        AudioSourceHandle::Local
    }

    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<AudioFrame>> {
        if self.thread.is_some() {
            return Err(Error::DeviceUnavailable(
                "local microphone already open".to_string(),
            ));
        }

        let (frame_tx, frame_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let shutdown = Arc::clone(&self.shutdown);
        shutdown.store(false, Ordering::Relaxed);

        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                Self::run_capture(sample_rate, channels, frame_tx, ready_tx, shutdown);
            })?;

        match tokio::time::timeout(OPEN_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(()))) => {
                self.thread = Some(thread);
                tracing::info!("local microphone capture started");
                Ok(frame_rx)
            }
            Ok(Ok(Err(e))) => {
                let _ = thread.join();
                Err(e)
            }
            Ok(Err(_)) => {
                let _ = thread.join();
                Err(Error::DeviceUnavailable(
                    "local capture thread exited during startup".to_string(),
                ))
            }
            Err(_) => {
                self.shutdown.store(true, Ordering::Relaxed);
                let _ = thread.join();
                Err(Error::DeviceUnavailable(
                    "local capture did not start in time".to_string(),
                ))
            }
        }
    }

    fn close(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.shutdown.store(true, Ordering::Relaxed);
            let _ = thread.join();
            tracing::info!("local microphone capture stopped");
        }
    }
}

impl Drop for LocalMicrophone {
    fn drop(&mut self) {
        self.close();
    }
}

/// Publisher side of the remote bridge: the IPC edge pushes frames here.
///
/// Pushing never blocks the producer; frames buffer until consumed.
#[derive(Clone)]
pub struct RemoteBridgeHandle {
    tx: mpsc::UnboundedSender<AudioFrame>,
}

impl RemoteBridgeHandle {
    /// Deliver one frame from the remote subsystem.
    ///
    /// Returns `false` once the bridge has been closed.
    pub fn push(&self, frame: AudioFrame) -> bool {
        self.tx.send(frame).is_ok()
    }
}

/// Frames relayed from a remote robot-audio subsystem.
///
/// The core treats the bridge purely as a push source; the transport that
/// feeds [`RemoteBridgeHandle`] lives outside this crate.
pub struct RemoteBridge {
    endpoint: String,
    rx: Option<mpsc::UnboundedReceiver<AudioFrame>>,
    handle: RemoteBridgeHandle,
}

impl RemoteBridge {
    /// Attach to a configured bridge endpoint
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceUnavailable`] if no endpoint is configured.
    pub fn connect(endpoint: &str) -> Result<Self> {
        if endpoint.trim().is_empty() {
            return Err(Error::DeviceUnavailable(
                "no bridge endpoint configured".to_string(),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!(endpoint, "remote audio bridge attached");
        Ok(Self {
            endpoint: endpoint.to_string(),
            rx: Some(rx),
            handle: RemoteBridgeHandle { tx },
        })
    }

    /// Publisher handle for the IPC edge feeding this bridge
    #[must_use]
    pub fn publisher(&self) -> RemoteBridgeHandle {
        self.handle.clone()
    }

    /// Configured endpoint, for logging
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl AudioSource for RemoteBridge {
    fn handle(&self) -> AudioSourceHandle {
        AudioSourceHandle::Remote
    }

    async fn open(&mut self) -> Result<mpsc::UnboundedReceiver<AudioFrame>> {
        self.rx.take().ok_or_else(|| {
            Error::DeviceUnavailable("bridge already opened or closed".to_string())
        })
    }

    fn close(&mut self) {
        self.rx = None;
    }
}

/// The source variant chosen at startup, plus the bridge publisher when the
/// remote variant won.
pub struct SelectedSource {
    pub source: Box<dyn AudioSource>,
    pub bridge: Option<RemoteBridgeHandle>,
}

/// Choose the audio source once at startup.
///
/// Prefers the remote bridge when an endpoint is configured, falling back to
/// the local microphone. The choice holds for the process lifetime.
///
/// # Errors
///
/// Returns [`Error::DeviceUnavailable`] when neither variant can be opened.
pub fn select_source(config: &AudioConfig) -> Result<SelectedSource> {
    if let Some(endpoint) = &config.bridge_endpoint {
        match RemoteBridge::connect(endpoint) {
            Ok(bridge) => {
                tracing::info!(endpoint, "audio source: remote bridge");
                let publisher = bridge.publisher();
                return Ok(SelectedSource {
                    source: Box::new(bridge),
                    bridge: Some(publisher),
                });
            }
            Err(e) => {
                tracing::warn!(error = %e, "remote bridge unavailable, falling back to local microphone");
            }
        }
    }

    let mic = LocalMicrophone::new(config)?;
    tracing::info!("audio source: local microphone");
    Ok(SelectedSource {
        source: Box::new(mic),
        bridge: None,
    })
}

/// Long-lived background task pumping frames from the active source into the
/// arbiter's tap slot.
///
/// Runs for the process lifetime; frames arriving while no lease holds the
/// tap are discarded, preserving per-lease production order without blocking
/// the source.
pub struct FramePump {
    task: JoinHandle<()>,
}

impl FramePump {
    /// Spawn the pump over an opened source's frame stream
    #[must_use]
    pub fn spawn(
        mut frames: mpsc::UnboundedReceiver<AudioFrame>,
        arbiter: &MicrophoneArbiter,
    ) -> Self {
        let tap: TapSlot = arbiter.tap_slot();
        let task = tokio::spawn(async move {
            while let Some(frame) = frames.recv().await {
                let sender = tap.lock().expect("tap slot poisoned").clone();
                if let Some(tx) = sender
                    && tx.send(frame).is_err()
                {
                    // Holder went away without clearing its tap
                    tap.lock().expect("tap slot poisoned").take();
                }
            }
            tracing::debug!("frame pump stopped: source closed");
        });
        Self { task }
    }

    /// Stop pumping; the source's own close handles device teardown
    pub fn shutdown(self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SAMPLE_RATE;

    fn test_config() -> AudioConfig {
        AudioConfig {
            bridge_endpoint: Some("bridge://robot/audio".to_string()),
            ..AudioConfig::default()
        }
    }

    #[test]
    fn bridge_requires_endpoint() {
        assert!(matches!(
            RemoteBridge::connect(""),
            Err(Error::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn bridge_open_is_single_shot() {
        let mut bridge = RemoteBridge::connect("bridge://robot/audio").unwrap();
        assert!(bridge.open().await.is_ok());
        assert!(matches!(
            bridge.open().await,
            Err(Error::DeviceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn bridge_buffers_pushed_frames() {
        let mut bridge = RemoteBridge::connect("bridge://robot/audio").unwrap();
        let publisher = bridge.publisher();
        let mut rx = bridge.open().await.unwrap();

        assert!(publisher.push(AudioFrame::new(SAMPLE_RATE, 1, vec![1i16; 160])));
        assert!(publisher.push(AudioFrame::new(SAMPLE_RATE, 1, vec![2i16; 160])));

        assert_eq!(rx.recv().await.unwrap().samples()[0], 1);
        assert_eq!(rx.recv().await.unwrap().samples()[0], 2);
    }

    #[tokio::test]
    async fn bridge_push_fails_after_close() {
        let mut bridge = RemoteBridge::connect("bridge://robot/audio").unwrap();
        let publisher = bridge.publisher();
        let rx = bridge.open().await.unwrap();
        drop(rx);
        bridge.close();
        assert!(!publisher.push(AudioFrame::new(SAMPLE_RATE, 1, vec![0i16; 16])));
    }

    #[test]
    fn selection_prefers_configured_bridge() {
        let selected = select_source(&test_config()).unwrap();
        assert_eq!(selected.source.handle(), AudioSourceHandle::Remote);
        assert!(selected.bridge.is_some());
    }

    #[tokio::test]
    async fn pump_delivers_to_subscribed_lease() {
        let arbiter = MicrophoneArbiter::new();
        let mut bridge = RemoteBridge::connect("bridge://robot/audio").unwrap();
        let publisher = bridge.publisher();
        let frames = bridge.open().await.unwrap();
        let pump = FramePump::spawn(frames, &arbiter);

        let lease = arbiter.try_acquire().unwrap();
        let mut tap = lease.subscribe().unwrap();

        publisher.push(AudioFrame::new(SAMPLE_RATE, 1, vec![7i16; 160]));
        let frame = tap.recv().await.unwrap();
        assert_eq!(frame.samples()[0], 7);

        pump.shutdown();
    }
}
