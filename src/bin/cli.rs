use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tethersync::audio::{find_transient_peak, AudioBuffer, AudioDecoder, AutoDecoder, WavDecoder};
use tethersync::session::{DeviceSessionController, ExecutionContext, SessionConfig, SessionEvent};
use tethersync::take::{align_files, finish_take, SyncStatus};
use tethersync::testing::{wav_bytes, FakeCamera};
use tethersync::{AlignmentConfig, AlignmentEngine, TetherSyncConfig};

/// Camera audio in `simulate-take` starts this much after the reference.
const SIMULATED_CAMERA_LEAD_SECONDS: f64 = 0.25;

fn main() -> Result<()> {
    tethersync::init_logging();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: tethersync-cli <align|detect-clap|config|simulate-take> [args]");
        std::process::exit(1);
    }

    let command = &args[1];
    match command.as_str() {
        "align" => cmd_align(&args),
        "detect-clap" => cmd_detect_clap(&args),
        "config" => cmd_config(&args),
        "simulate-take" => cmd_simulate_take(&args),
        "--version" => {
            println!("{} {}", tethersync::NAME, tethersync::VERSION);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            std::process::exit(1);
        }
    }
}

/// Positional arguments and `--flag [value]` options after the command name.
struct ParsedArgs {
    positional: Vec<String>,
    window: Option<f64>,
    config: Option<PathBuf>,
    reference: Option<PathBuf>,
    json: bool,
}

fn parse_args(args: &[String]) -> Result<ParsedArgs> {
    let mut parsed = ParsedArgs {
        positional: Vec::new(),
        window: None,
        config: None,
        reference: None,
        json: false,
    };

    let mut i = 2;
    while i < args.len() {
        match args[i].as_str() {
            "--window" => {
                i += 1;
                let value = args.get(i).ok_or_else(|| anyhow!("--window needs a value"))?;
                parsed.window = Some(value.parse().context("--window must be a number")?);
            }
            "--config" | "--path" => {
                i += 1;
                let value = args.get(i).ok_or_else(|| anyhow!("{} needs a value", args[i - 1]))?;
                parsed.config = Some(PathBuf::from(value));
            }
            "--reference" => {
                i += 1;
                let value = args.get(i).ok_or_else(|| anyhow!("--reference needs a value"))?;
                parsed.reference = Some(PathBuf::from(value));
            }
            "--json" => parsed.json = true,
            other => parsed.positional.push(other.to_string()),
        }
        i += 1;
    }
    Ok(parsed)
}

fn load_config(path: Option<&Path>) -> Result<TetherSyncConfig> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(TetherSyncConfig::default_path);
    let config = TetherSyncConfig::load_layered(&path)
        .with_context(|| format!("loading {}", path.display()))?;
    config
        .validate()
        .map_err(|e| anyhow!("invalid configuration: {}", e))?;
    Ok(config)
}

fn cmd_align(args: &[String]) -> Result<()> {
    // align <reference> <candidate> [--window <s>] [--config <file>] [--json]
    let parsed = parse_args(args)?;
    let [reference, candidate] = parsed.positional.as_slice() else {
        eprintln!("Usage: tethersync-cli align <reference> <candidate> [--window <s>] [--json]");
        std::process::exit(1);
    };

    let config = load_config(parsed.config.as_deref())?;
    let mut alignment = AlignmentConfig::from(&config.alignment);
    if let Some(window) = parsed.window {
        alignment.search_window_seconds = window;
    }
    let engine = AlignmentEngine::new(alignment);
    let decoder = AutoDecoder::from(&config.decode);

    let result = align_files(Path::new(reference), Path::new(candidate), &decoder, &engine)?;
    if parsed.json {
        println!("{}", serde_json::to_string(&result)?);
    } else {
        println!(
            "offset {:+.4}s  confidence {:.2}  ({})",
            result.offset_seconds,
            result.confidence,
            if result.is_usable() { "usable" } else { "unreliable" }
        );
    }
    Ok(())
}

fn cmd_detect_clap(args: &[String]) -> Result<()> {
    // detect-clap <file> [--window <s>] [--config <file>]
    let parsed = parse_args(args)?;
    let [file] = parsed.positional.as_slice() else {
        eprintln!("Usage: tethersync-cli detect-clap <file> [--window <s>]");
        std::process::exit(1);
    };

    let config = load_config(parsed.config.as_deref())?;
    let window = parsed
        .window
        .unwrap_or(config.alignment.search_window_seconds);
    let decoder = AutoDecoder::from(&config.decode);
    let audio = decoder.decode(Path::new(file), Some(window))?;

    let peak = find_transient_peak(&audio, config.alignment.transient_smoothing_seconds)
        .ok_or_else(|| anyhow!("no transient found in {}", file))?;
    println!("{:.4}", peak.time_seconds);
    Ok(())
}

fn cmd_config(args: &[String]) -> Result<()> {
    // config [--path <file>]
    let parsed = parse_args(args)?;
    let config = load_config(parsed.config.as_deref())?;
    if parsed.json {
        println!("{}", serde_json::to_string_pretty(&config)?);
    } else {
        print!("{}", toml::to_string_pretty(&config)?);
    }
    Ok(())
}

fn cmd_simulate_take(args: &[String]) -> Result<()> {
    // simulate-take <dest_dir> <seconds> [--reference <wav>] [--config <file>] [--json]
    let parsed = parse_args(args)?;
    let [destination, seconds] = parsed.positional.as_slice() else {
        eprintln!(
            "Usage: tethersync-cli simulate-take <dest_dir> <seconds> [--reference <wav>] [--json]"
        );
        std::process::exit(1);
    };
    let seconds: f64 = seconds.parse().context("<seconds> must be a number")?;
    if !seconds.is_finite() || seconds < 0.0 {
        bail!("<seconds> must be non-negative");
    }

    let config = load_config(parsed.config.as_deref())?;

    let camera = FakeCamera::new();
    if let Some(reference) = parsed.reference.as_deref() {
        let audio = WavDecoder.decode(reference, None)?;
        let skip = (SIMULATED_CAMERA_LEAD_SECONDS * audio.sample_rate() as f64) as usize;
        let camera_audio = AudioBuffer::new(
            audio.samples().get(skip..).unwrap_or_default().to_vec(),
            audio.sample_rate(),
        )?;
        camera.set_take_payload(wav_bytes(&camera_audio)?, "WAV");
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || stop.store(true, Ordering::SeqCst))
            .context("installing Ctrl+C handler")?;
    }

    let session_config =
        SessionConfig::from(&config).with_execution(ExecutionContext::DedicatedThread);
    let controller = DeviceSessionController::new(camera, session_config)?;
    controller.open()?;
    let job = controller.start_recording()?;
    if !parsed.json {
        println!("Recording take {} (Ctrl+C to stop early)", job.id);
    }

    let started = Instant::now();
    while started.elapsed() < Duration::from_secs_f64(seconds) && !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(50));
        report_events(&controller, parsed.json);
    }

    let engine = AlignmentEngine::new(AlignmentConfig::from(&config.alignment));
    let decoder = AutoDecoder::from(&config.decode);
    let outcome = finish_take(
        &controller,
        Path::new(destination),
        parsed.reference.as_deref(),
        &decoder,
        &engine,
    )?;
    report_events(&controller, parsed.json);
    controller.close();

    if parsed.json {
        println!("{}", serde_json::to_string(&outcome)?);
        return Ok(());
    }

    println!("Downloaded {}", outcome.video_path.display());
    match &outcome.sync {
        SyncStatus::Aligned(result) => println!(
            "Place video at reference start {:+.4}s (confidence {:.2})",
            result.offset_seconds, result.confidence
        ),
        SyncStatus::Skipped => println!("No reference given; alignment skipped"),
        SyncStatus::Failed { reason } => println!("Alignment failed: {}", reason),
    }
    Ok(())
}

fn report_events(controller: &DeviceSessionController<FakeCamera>, json: bool) {
    while let Some(event) = controller.poll_event() {
        if json {
            continue;
        }
        match event {
            SessionEvent::StateChanged { from, to } => println!("  {} -> {}", from, to),
            SessionEvent::HeartbeatMissed { consecutive } => {
                println!("  heartbeat missed ({})", consecutive)
            }
            SessionEvent::DownloadComplete { path } => println!("  saved {}", path.display()),
            SessionEvent::PendingTakeDropped(file) => println!("  left on card: {}", file.path),
            _ => {}
        }
    }
}
