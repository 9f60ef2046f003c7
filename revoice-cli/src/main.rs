//! Interactive shell around `RevoiceEngine`.
//!
//! Reads commands from stdin while a background task prints status changes
//! from the engine's broadcast channel. In automatic mode the engine starts
//! listening immediately; in manual mode `start`/`stop` bracket each take.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use owo_colors::OwoColorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use revoice_core::audio::device::{list_input_devices, list_output_devices};
use revoice_core::convert::ConversionService;
use revoice_core::playback::SampleSink;
use revoice_core::{
    CaptureMode, ConversionPipeline, ConverterHandle, CpalSink, ElevenLabsConfig,
    ElevenLabsConverter, EngineConfig, Janitor, OutputEncoding, RecordingStore, RevoiceEngine,
    RevoiceError, SessionStatus,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Raw 16-bit PCM (no decode latency).
    Pcm,
    /// MP3 (smaller responses, decoded on the fly).
    Mp3,
}

/// Live voice changer: microphone → conversion service → virtual cable.
#[derive(Parser, Debug)]
#[command(name = "revoice", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Conversion service API key.
    #[arg(long, env = "REVOICE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Target voice identity.
    #[arg(long, env = "REVOICE_VOICE_ID")]
    voice_id: Option<String>,

    /// Capture mode: 0 = manual (start/stop per take), 1 = automatic.
    #[arg(long, env = "REVOICE_MODE", default_value = "1")]
    mode: u8,

    /// Microphone selector (case-insensitive name substring).
    #[arg(long, env = "REVOICE_INPUT_DEVICE", value_name = "NAME")]
    input_device: Option<String>,

    /// Playback device selector (case-insensitive name substring).
    #[arg(
        long,
        env = "REVOICE_OUTPUT_DEVICE",
        value_name = "NAME",
        default_value = "cable input"
    )]
    output_device: String,

    /// Directory for converted-audio artifacts.
    #[arg(long, env = "REVOICE_RECORDINGS_DIR", default_value = "recordings")]
    recordings_dir: PathBuf,

    /// Capture sample rate requested from the microphone (Hz).
    #[arg(long, env = "REVOICE_SAMPLE_RATE", default_value = "48000")]
    sample_rate: u32,

    /// Capture channels requested from the microphone.
    #[arg(long, env = "REVOICE_CHANNELS", default_value = "1")]
    channels: u16,

    /// RMS level above which a frame counts as voice.
    #[arg(long, default_value = "0.015")]
    silence_threshold: f32,

    /// Trailing silence (ms) that ends an utterance in automatic mode.
    #[arg(long, default_value = "1200", value_name = "MS")]
    silence_duration: u64,

    /// Response chunks buffered before playback starts.
    #[arg(long, default_value = "3")]
    lead_chunks: usize,

    /// Response audio format requested from the service.
    #[arg(long, value_enum, default_value = "pcm")]
    output_format: OutputFormat,

    /// Conversion request timeout in seconds.
    #[arg(long, default_value = "30", value_name = "SECS")]
    timeout: u64,

    /// Print a live voice-activity meter.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List audio devices and exit.
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Some(Commands::Devices) = cli.command {
        print_devices();
        return Ok(());
    }

    run_shell(cli).await
}

fn print_devices() {
    println!("{}", "input devices".bold());
    for device in list_input_devices() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{}", device.name, marker.dimmed());
    }
    println!("{}", "output devices".bold());
    for device in list_output_devices() {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("  {}{}", device.name, marker.dimmed());
    }
}

async fn run_shell(cli: Cli) -> Result<()> {
    let api_key = cli
        .api_key
        .clone()
        .context("missing API key: set REVOICE_API_KEY or pass --api-key")?;
    let voice_id = cli
        .voice_id
        .clone()
        .context("missing voice identity: set REVOICE_VOICE_ID or pass --voice-id")?;

    let mode = CaptureMode::from_index(cli.mode)?;
    let encoding = match cli.output_format {
        OutputFormat::Pcm => OutputEncoding::Pcm16 { sample_rate: 44_100 },
        OutputFormat::Mp3 => OutputEncoding::Mp3 { sample_rate: 44_100 },
    };

    let engine_config = EngineConfig {
        mode,
        sample_rate: cli.sample_rate,
        channels: cli.channels,
        silence_threshold: cli.silence_threshold,
        silence_duration: Duration::from_millis(cli.silence_duration),
        lead_chunks: cli.lead_chunks,
        preferred_input_device: cli.input_device.clone(),
        preferred_output_device: Some(cli.output_device.clone()),
        ..EngineConfig::default()
    };

    let mut service_config = ElevenLabsConfig::new(api_key, voice_id);
    service_config.encoding = encoding;
    service_config.timeout = Duration::from_secs(cli.timeout);
    let service = ElevenLabsConverter::new(service_config)?;

    let store = RecordingStore::new(&cli.recordings_dir)?;
    let janitor = Janitor::start(store.dir().to_path_buf());

    let output_device = engine_config.preferred_output_device.clone();
    let engine = Arc::new(RevoiceEngine::new(engine_config)?);
    let sink_factory = Box::new(move || {
        CpalSink::open(output_device.as_deref(), encoding.sample_rate())
            .map(|sink| Box::new(sink) as Box<dyn SampleSink>)
    });

    let service: Arc<dyn ConversionService> = Arc::new(service);
    let pipeline = ConversionPipeline::new(service, encoding, cli.lead_chunks, sink_factory)
        .with_store(store)
        .with_playback_hook(engine.playback_hook());
    engine.set_converter(ConverterHandle::new(pipeline));

    print_banner(mode);
    spawn_status_printer(&engine);
    if cli.verbose {
        spawn_activity_meter(&engine);
    }

    if mode == CaptureMode::Automatic {
        start_engine(&engine);
    } else {
        println!("{}", "manual mode: type 'start' to begin a take".dimmed());
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some("start"), _) => start_engine(&engine),
            (Some("stop"), _) => match engine.stop() {
                Ok(()) => {}
                // Stopping while idle is a no-op, not a failure.
                Err(RevoiceError::NotRunning) => {
                    println!("{}", "nothing to stop".dimmed());
                }
                Err(e) => print_error(&e.to_string()),
            },
            (Some("mode"), None) => {
                println!("mode: {:?} ({})", engine.mode(), engine.mode().index());
            }
            (Some("mode"), Some(arg)) => match arg.parse::<u8>() {
                Ok(index) => match CaptureMode::from_index(index) {
                    Ok(new_mode) => {
                        if let Err(e) = engine.set_mode(new_mode) {
                            print_error(&e.to_string());
                        } else if new_mode == CaptureMode::Automatic {
                            start_engine(&engine);
                        }
                    }
                    Err(e) => print_error(&e.to_string()),
                },
                Err(_) => print_error("mode takes 0 (manual) or 1 (automatic)"),
            },
            (Some("status"), _) => {
                let snap = engine.diagnostics_snapshot();
                println!(
                    "status: {:?} | frames {} | segments {} | converted {} | errors {}",
                    engine.status(),
                    snap.frames_in,
                    snap.segments_started,
                    snap.segments_converted,
                    snap.conversion_errors
                );
            }
            (Some("devices"), _) => print_devices(),
            (Some("clear"), _) => print!("\x1b[2J\x1b[H"),
            (Some("quit" | "exit"), _) => break,
            (Some("help"), _) => print_help(),
            (Some(other), _) => {
                print_error(&format!("unknown command '{other}' (try 'help')"));
            }
            (None, _) => {}
        }
    }

    if engine.status() != SessionStatus::Stopped {
        let _ = engine.stop();
    }
    janitor.shutdown().await;
    println!("{}", "bye".dimmed());
    Ok(())
}

/// `start()` blocks until the device is confirmed open, so keep it off the
/// async executor threads.
fn start_engine(engine: &Arc<RevoiceEngine>) {
    let result = tokio::task::block_in_place(|| engine.start());
    if let Err(e) = result {
        print_error(&e.to_string());
    }
}

fn spawn_status_printer(engine: &Arc<RevoiceEngine>) {
    let mut rx = engine.subscribe_status();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let label = match event.status {
                        SessionStatus::Idle => "idle".dimmed().to_string(),
                        SessionStatus::Listening => "listening".green().to_string(),
                        SessionStatus::Recording => "recording".yellow().bold().to_string(),
                        SessionStatus::Converting => "converting".cyan().to_string(),
                        SessionStatus::Playing => "playing".magenta().to_string(),
                        SessionStatus::Stopped => "stopped".dimmed().to_string(),
                        SessionStatus::Error => "error".red().bold().to_string(),
                    };
                    match event.detail {
                        Some(detail) => println!("[{label}] {detail}"),
                        None => println!("[{label}]"),
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("{}", format!("(skipped {skipped} status events)").dimmed());
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// Prints a line whenever the VAD's speech decision flips.
fn spawn_activity_meter(engine: &Arc<RevoiceEngine>) {
    let mut rx = engine.subscribe_activity();
    tokio::spawn(async move {
        let mut was_speech = false;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if event.is_speech != was_speech {
                        was_speech = event.is_speech;
                        let state = if event.is_speech {
                            "voice".green().to_string()
                        } else {
                            "quiet".dimmed().to_string()
                        };
                        println!("  {} rms={:.4}", state, event.rms);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn print_banner(mode: CaptureMode) {
    println!("{}", "revoice — live voice changer".bold());
    println!(
        "mode: {:?} | commands: start stop mode status devices clear help quit",
        mode
    );
}

fn print_help() {
    println!("  start        begin capturing (manual: begin a take)");
    println!("  stop         stop capturing (manual: finish + convert the take)");
    println!("  mode [0|1]   show or switch capture mode (0 manual, 1 automatic)");
    println!("  status       session status and counters");
    println!("  devices      list audio devices");
    println!("  quit         exit");
}

fn print_error(message: &str) {
    eprintln!("{} {message}", "error:".red().bold());
}
