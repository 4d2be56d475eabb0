use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio_stream::StreamExt;
use tracing_subscriber::EnvFilter;

use speech_gateway::{
    Collaborators, Config, DeviceControl, FramePump, HttpBatchTranscriber, HttpReasoner,
    LocalDeviceControl, MicrophoneArbiter, SpeechServiceRouter, TranscriptEvent,
    WsRealtimeTranscriber, select_source,
};

/// speechd - speech orchestration gateway for voice-interactive agents
#[derive(Parser)]
#[command(name = "speechd", version, about)]
struct Cli {
    /// Path to TOML config file
    #[arg(short, long, env = "SPEECHD_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture once and print the transcript
    Transcribe {
        /// Capture duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Stream realtime transcripts until interrupted
    Listen,
    /// Forward a question to the reasoning backend
    Ask {
        /// The question text
        question: String,
    },
    /// Toggle the capture hardware
    Mic {
        #[arg(value_enum)]
        state: MicState,
    },
    /// Capture audio and print clip statistics, without transcribing
    TestMic {
        /// Capture duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum MicState {
    On,
    Off,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,speech_gateway=info",
        1 => "info,speech_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref())?;

    // One-time source selection for the process lifetime
    let mut selected = select_source(&config.audio)?;
    let frames = selected.source.open().await?;

    let arbiter = MicrophoneArbiter::new();
    let pump = FramePump::spawn(frames, &arbiter);

    let device = Arc::new(LocalDeviceControl::new());
    let collaborators = Collaborators {
        batch: Arc::new(HttpBatchTranscriber::new(
            config.services.batch_endpoint.clone(),
            config.services.batch_api_key.clone(),
            config.services.batch_model.clone(),
        )?),
        realtime: Arc::new(WsRealtimeTranscriber::new(
            config.services.realtime_endpoint.clone(),
            config.services.realtime_api_key.clone(),
        )?),
        reasoner: Arc::new(HttpReasoner::new(
            config.services.reasoning_endpoint.clone(),
            config.services.reasoning_api_key.clone(),
            config.services.reasoning_model.clone(),
        )?),
        device: device.clone(),
    };

    // When the robot bridge is active, apply speech parameters and volume
    if selected.bridge.is_some() {
        device
            .set_voice_parameters(&config.voice.parameters)
            .await?;
        device.set_output_volume(config.voice.output_volume).await?;
    }

    let router = SpeechServiceRouter::new(arbiter, collaborators, &config);

    let result = match cli.command {
        Command::Transcribe { duration } => {
            let text = router
                .transcribe_once(Duration::from_secs(duration))
                .await?;
            println!("{text}");
            Ok(())
        }
        Command::Listen => listen(&router).await,
        Command::Ask { question } => {
            let answer = router.ask_question(&question).await?;
            println!("{answer}");
            Ok(())
        }
        Command::Mic { state } => {
            router
                .set_microphone_enabled(matches!(state, MicState::On))
                .await?;
            Ok(())
        }
        Command::TestMic { duration } => {
            let lease = router.arbiter().try_acquire()?;
            let capture = speech_gateway::CaptureBuffer::new(&config.audio);
            let clip = capture
                .collect(lease, Duration::from_secs(duration))
                .await?;
            println!(
                "captured {:.2}s: {} samples/channel at {}Hz, {} channels",
                clip.duration_secs(),
                clip.samples_per_channel(),
                clip.sample_rate(),
                clip.channels()
            );
            Ok(())
        }
    };

    pump.shutdown();
    selected.source.close();
    result
}

/// Stream realtime transcripts to stdout until ctrl-c
async fn listen(router: &SpeechServiceRouter) -> anyhow::Result<()> {
    let mut events = router.start_realtime_transcription().await?;
    tracing::info!("listening; press ctrl-c to stop");

    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(TranscriptEvent::Partial(text)) => print!("{text}\r"),
                Some(TranscriptEvent::Final(text)) => println!("{text}"),
                Some(TranscriptEvent::Error(reason)) => {
                    tracing::error!(reason = %reason, "realtime session error");
                    break;
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    router.stop_realtime_transcription().await;
    Ok(())
}
