use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::Parser;
use tracing_subscriber::fmt::time::ChronoLocal;
use tracing_subscriber::EnvFilter;
use voice_session::types::events::{
    AgentSpeechEnded, AgentSpeechStarted, AudioStream, ConnectionLost, ConnectionRestored, MicPermissionDenied,
    SessionErrorEvent, SessionMetadata, TranscriptUpdated,
};
use voice_session::types::AudioFrame;
use voice_session::utils;
use voice_session::{NativeDevices, SessionConfigBuilder, SessionController, WsTransport};

#[derive(Parser, Debug)]
#[command(version, about = "Talk to a voice agent from the terminal")]
struct Cli {
    /// Print the audio devices and exit.
    #[arg(long)]
    list_devices: bool,

    /// Stream analysis frames of the agent's audio.
    #[arg(long)]
    raw_audio: bool,

    /// Write the last analysis frame to this WAV file on exit. Implies --raw-audio.
    #[arg(long)]
    snapshot: Option<PathBuf>,
}

fn write_snapshot(path: &PathBuf, sample_rate: u32, frame: &AudioFrame) -> anyhow::Result<()> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for sample in frame.samples() {
        writer.write_sample(*sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv_override().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    let cli = Cli::parse();
    if cli.list_devices {
        println!("{}", utils::device::get_available_inputs()?);
        println!("{}", utils::device::get_available_outputs()?);
        return Ok(());
    }

    let config = SessionConfigBuilder::from_env()
        .with_raw_audio(cli.raw_audio || cli.snapshot.is_some())
        .build();
    let sample_rate = config.audio_sample_rate();

    let mut controller = SessionController::new(WsTransport::default(), NativeDevices);
    let events = controller.events().clone();

    events.on::<TranscriptUpdated, _>(|update| {
        if let Some(entry) = update.entries().last() {
            println!("{}: {}", entry.role(), entry.content());
        }
    });
    events.on::<SessionMetadata, _>(|metadata| tracing::info!("session metadata: {:?}", metadata.metadata()));
    events.on::<AgentSpeechStarted, _>(|_| tracing::info!("agent speaking"));
    events.on::<AgentSpeechEnded, _>(|_| tracing::info!("agent done speaking"));
    events.on::<ConnectionLost, _>(|_| tracing::warn!("connection lost, reconnecting"));
    events.on::<ConnectionRestored, _>(|_| tracing::info!("connection restored"));
    events.on::<MicPermissionDenied, _>(|denied| eprintln!("microphone unavailable: {}", denied.error()));
    events.on::<SessionErrorEvent, _>(|error| eprintln!("session error: {}", error.cause()));

    let last_frame: Arc<Mutex<Option<AudioFrame>>> = Arc::new(Mutex::new(None));
    let frames = last_frame.clone();
    events.on::<AudioStream, _>(move |stream| {
        if let Ok(mut last) = frames.lock() {
            *last = Some(stream.frame().clone());
        }
    });

    if controller.initiate_session(config).await.is_err() {
        // Already reported through the error subscribers.
        return Ok(());
    }
    println!("connected, press ctrl-c to hang up");

    tokio::select! {
        _ = controller.run() => println!("the agent ended the session"),
        _ = tokio::signal::ctrl_c() => println!("hanging up"),
    }
    controller.terminate_session().await;

    let stats = controller.stats();
    tracing::info!(
        "data messages: {}, ignored: {}, audio frames: {}",
        stats.data_messages(),
        stats.ignored_messages(),
        stats.audio_frames()
    );

    if let Some(path) = cli.snapshot {
        let frame = last_frame.lock().ok().and_then(|last| last.clone());
        match frame {
            Some(frame) => {
                write_snapshot(&path, sample_rate, &frame)?;
                println!("wrote {} samples to {}", frame.len(), path.display());
            }
            None => println!("no audio frames received, nothing written"),
        }
    }
    Ok(())
}
