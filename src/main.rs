use anyhow::Result;
use clap::Parser;
use luckycam::{LuckycamConfig, LuckycamOrchestrator, RunOptions, SimulatedDriver};
use std::path::Path;
use tracing::{error, info};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};

#[derive(Parser, Debug)]
#[command(name = "luckycam")]
#[command(about = "Exposure control and frame recording for lucky imaging")]
#[command(version)]
#[command(long_about = "Drives a rolling-shutter sensor for lucky imaging: continuous \
exposures with a live preview rendezvous, closed-loop auto-exposure and bounded \
recording runs with free-space reporting. Runs against the built-in simulated camera.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "luckycam.toml", help = "Path to TOML configuration file")]
    config: String,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to this file
    #[arg(long, value_name = "PATH", help = "Append logs to a file in addition to stderr")]
    log_file: Option<String>,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without opening the camera")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Stop after this many preview frames
    #[arg(long, value_name = "N")]
    frames: Option<u64>,

    /// Record N frames, then exit
    #[arg(long, value_name = "N")]
    record: Option<u32>,

    /// Optimise the exposure time automatically
    #[arg(long)]
    auto_exposure: bool,

    /// Exposure time in seconds
    #[arg(long, value_name = "SECONDS")]
    exposure: Option<f64>,

    /// Analogue gain
    #[arg(long)]
    gain: Option<f64>,

    /// Raw mode index (see --list-modes)
    #[arg(long, value_name = "INDEX")]
    mode: Option<usize>,

    /// List the usable raw modes and exit
    #[arg(long)]
    list_modes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let log_guard = init_logging(&args)?;

    info!("Starting luckycam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", args.config);

    let mut config = match LuckycamConfig::load_from_file(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    if let Some(frames) = args.record {
        config.recording.frames_to_record = frames;
    }

    if let Err(e) = config.validate() {
        error!("Configuration validation failed: {}", e);
        eprintln!("✗ Configuration validation failed: {}", e);
        drop(log_guard);
        std::process::exit(1);
    }

    if args.validate_config {
        info!("Configuration validation successful");
        println!("✓ Configuration is valid");
        return Ok(());
    }

    let driver = SimulatedDriver::from_config(&config.simulation);
    let mut orchestrator = LuckycamOrchestrator::new(config);
    orchestrator.open(driver).map_err(|e| {
        error!("Failed to open camera: {}", e);
        e
    })?;

    if args.list_modes {
        for (index, mode) in orchestrator.modes().iter().enumerate() {
            println!(
                "{}: {} (true size {}x{}, binning {}x{}, exposure {}..{}us, gain {}..{})",
                index,
                mode.label,
                mode.true_size.0,
                mode.true_size.1,
                mode.binning.0,
                mode.binning.1,
                mode.min_exposure_us,
                mode.max_exposure_us,
                mode.min_gain,
                mode.max_gain
            );
        }
        orchestrator.shutdown();
        return Ok(());
    }

    if let Some(index) = args.mode {
        orchestrator.select_mode(index)?;
    }
    if let Some(exposure) = args.exposure {
        orchestrator.set_exposure_time(exposure);
    }
    if let Some(gain) = args.gain {
        orchestrator.set_gain(gain);
    }
    if args.auto_exposure {
        orchestrator.set_auto_exposure(true);
    }
    if args.record.is_some() {
        orchestrator.start_recording();
    }

    let outcome = orchestrator
        .run(RunOptions {
            max_frames: args.frames,
            stop_after_recording: args.record.is_some(),
        })
        .await;

    let exit_code = orchestrator.shutdown();

    match outcome {
        Ok(summary) => {
            info!(
                "Processed {} frames, recorded {}, exposure {}us ({:?})",
                summary.frames, summary.recorded, summary.final_exposure_us, summary.reason
            );
        }
        Err(e) => {
            error!("Capture loop failed: {}", e);
            return Err(e.into());
        }
    }

    info!("luckycam exited with code: {}", exit_code);
    // process::exit skips destructors; flush the log file first
    drop(log_guard);
    std::process::exit(exit_code);
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("luckycam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_names(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer()
                .with_target(true)
                .with_thread_names(args.debug)
                .with_file(args.debug)
                .with_line_number(args.debug)
                .boxed()
        }
    };

    let (file_layer, guard) = match args.log_file.as_deref() {
        Some(path) => {
            let (writer, guard) = log_file_writer(Path::new(path))?;
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_thread_names(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(file_layer)
        .with(env_filter)
        .init();

    Ok(guard)
}

/// Non-blocking writer appending to `path`. Buffered lines reach the file
/// once the guard is dropped.
fn log_file_writer(path: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    let directory = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
    let appender = tracing_appender::rolling::never(directory, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    println!("# luckycam configuration file");
    println!("# Default values for every option; environment variables override them,");
    println!("# e.g. LUCKYCAM_CAMERA__POLL_PERIOD_MS=100");
    println!();
    println!("{}", toml::to_string_pretty(&LuckycamConfig::default())?);
    Ok(())
}
