use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use navi_voice::voice::{
    ActivityDetector, AudioFrame, CpalSource, FrameSource, SourceEvent, WavFileSource,
    event_queue, sink_from_config,
};
use navi_voice::{Config, Daemon};

/// Navi - always-on voice command front end
#[derive(Parser)]
#[command(name = "navi", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log responses instead of speaking them
    #[arg(long, env = "NAVI_NO_SPEECH")]
    no_speech: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print microphone energy once per second, for tuning the voice threshold
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Run the pipeline over a 16-bit WAV file
    Replay {
        /// WAV file recorded at the configured sample rate
        file: PathBuf,
        /// Pace the file like a live microphone
        #[arg(long)]
        realtime: bool,
    },
    /// Render text through the configured response sink
    Say {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,navi_voice=info",
        1 => "info,navi_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    let speak = !cli.no_speech;

    match cli.command {
        Some(Command::TestMic { duration }) => test_mic(&config, duration).await,
        Some(Command::Replay { file, realtime }) => replay(config, file, realtime, speak).await,
        Some(Command::Say { text }) => say(&config, &text, speak),
        Some(Command::Config) => {
            println!("{config:#?}");
            Ok(())
        }
        None => listen(config, speak).await,
    }
}

/// Listen on the microphone until interrupted
#[allow(clippy::future_not_send)]
async fn listen(config: Config, speak: bool) -> anyhow::Result<()> {
    tracing::info!(
        sample_rate = config.audio.sample_rate,
        voice_threshold = config.segmentation.voice_threshold,
        "starting navi"
    );

    let source = Box::new(CpalSource::new(config.audio.sample_rate));
    let daemon = Daemon::from_config(config, source, speak)?;

    let summary = daemon.run(shutdown_signal()).await?;
    tracing::info!(?summary, "navi stopped");

    Ok(())
}

/// Replay a WAV file through the full pipeline
#[allow(clippy::future_not_send)]
async fn replay(config: Config, file: PathBuf, realtime: bool, speak: bool) -> anyhow::Result<()> {
    let source = Box::new(WavFileSource::new(&file, config.audio.sample_rate).realtime(realtime));
    let daemon = Daemon::from_config(config, source, speak)?;

    let summary = daemon.run(shutdown_signal()).await?;
    println!(
        "{}: {} activation(s), {} segment(s), {} transcription failure(s)",
        file.display(),
        summary.activations,
        summary.segments,
        summary.transcription_failures
    );

    Ok(())
}

/// Render one response and wait for the speaker to finish
fn say(config: &Config, text: &str, speak: bool) -> anyhow::Result<()> {
    let sink = sink_from_config(config, speak)?;
    sink.render(text);
    // Dropping the sink waits for queued speech
    drop(sink);
    Ok(())
}

/// Print per-second energy and the voice decision
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let sample_rate = config.audio.sample_rate;
    let threshold = config.segmentation.voice_threshold;
    let detector = ActivityDetector::new(threshold);

    let (tx, mut rx) = event_queue();
    let mut source = CpalSource::new(sample_rate);
    source.start(tx)?;

    println!("Sample rate: {sample_rate} Hz, voice threshold: {threshold}");
    println!("---");

    let second = usize::try_from(sample_rate)?;
    let mut pending: Vec<i16> = Vec::with_capacity(second);
    let mut elapsed = 0u64;

    while elapsed < duration {
        let event = tokio::time::timeout(Duration::from_secs(3), rx.recv()).await;
        match event {
            Ok(Some(SourceEvent::Chunk(chunk))) => pending.extend(chunk),
            Ok(Some(SourceEvent::Fault(e))) => anyhow::bail!("capture failed: {e}"),
            Ok(Some(SourceEvent::Finished) | None) => break,
            Err(_) => anyhow::bail!("no audio received for 3 seconds"),
        }

        while pending.len() >= second {
            let samples: Vec<i16> = pending.drain(..second).collect();
            let peak = samples.iter().map(|s| s.unsigned_abs()).max().unwrap_or(0);
            let frame = AudioFrame::new(Duration::from_secs(elapsed), sample_rate, samples);
            let energy = detector.detect(&frame);
            elapsed += 1;

            // Visual meter, full at twice the threshold
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let meter_len = ((energy.energy / (threshold * 2.0)) * 50.0).clamp(0.0, 50.0) as usize;
            let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

            println!(
                "[{elapsed:2}s] RMS: {:7.1} | Peak: {peak:5} | {} | [{meter}]",
                energy.energy,
                if detector.is_voice(&energy) { "voice  " } else { "silence" },
            );
        }
    }

    source.stop();

    println!("\n---");
    println!("Set NAVI_VOICE_THRESHOLD between the silence and speech RMS levels.");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
