use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use bugrecorder::finalizer::{FileSessionStore, SessionStore};
use bugrecorder::report::format_report;
use bugrecorder::surfaces::simulated::{SimulatedDebuggerBackend, SimulatedMediaBackend, SimulatedScriptHost};
use bugrecorder::{CaptureOptions, EventFilter, RecorderBuilder, RecorderConfig, RecorderEvent, SessionId};

#[derive(Parser, Debug)]
#[command(name = "bugrecorder")]
#[command(about = "Record browser sessions into bug reports")]
#[command(version)]
#[command(long_about = "Drives the recording-session orchestrator: starts video, network, \
console and DOM capture on a target, stops it as one transition and persists the session \
as a reviewable record. The demo command runs a session against simulated capture surfaces.")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "bugrecorder.toml", help = "Path to TOML configuration file")]
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

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit")]
    validate_config: bool,

    /// Print default configuration and exit
    #[arg(long, help = "Print default configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record a session against simulated capture surfaces
    Demo {
        /// Target context to record
        #[arg(long, default_value = "demo-tab")]
        target: String,

        /// How long to keep recording
        #[arg(long, default_value_t = 1500)]
        duration_ms: u64,

        #[arg(long)]
        no_video: bool,

        #[arg(long)]
        no_network: bool,

        /// Detach the debugger halfway through to exercise the failure path
        #[arg(long)]
        simulate_detach: bool,
    },
    /// List recent recordings
    List,
    /// Print the report for a recording
    Show { id: SessionId },
    /// Delete a recording
    Delete { id: SessionId },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_default_config()?;
        return Ok(());
    }

    let _guard = init_logging(&args)?;

    info!("Starting bugrecorder v{}", env!("CARGO_PKG_VERSION"));
    let config = RecorderConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load configuration from {}", args.config))?;

    if args.validate_config {
        match config.validate() {
            Ok(()) => {
                println!("✓ Configuration is valid");
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let store = FileSessionStore::new(config.storage_path(), config.storage.max_recent_records);

    match args.command.unwrap_or(Command::Demo {
        target: "demo-tab".to_string(),
        duration_ms: 1500,
        no_video: false,
        no_network: false,
        simulate_detach: false,
    }) {
        Command::Demo {
            target,
            duration_ms,
            no_video,
            no_network,
            simulate_detach,
        } => {
            let mut options = config.default_capture_options();
            options.capture_video &= !no_video;
            options.capture_network &= !no_network;
            run_demo(
                config,
                &store,
                target,
                options,
                Duration::from_millis(duration_ms),
                simulate_detach,
            )
            .await
        }
        Command::List => {
            let recordings = store.list_recent().await.context("Failed to read recordings index")?;
            if recordings.is_empty() {
                println!("No recordings in {}", store.root().display());
            }
            for summary in recordings {
                println!(
                    "{}  {}  {:>6.1}s  console={} network={} video={}{}",
                    summary.id,
                    summary.started_at.format("%Y-%m-%d %H:%M:%S"),
                    summary.duration_ms as f64 / 1000.0,
                    summary.console_log_count,
                    summary.network_log_count,
                    summary.has_video,
                    summary
                        .error
                        .as_deref()
                        .map(|e| format!("  error: {}", e))
                        .unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Show { id } => {
            let record = store
                .load_record(&id)
                .await
                .with_context(|| format!("Failed to load recording {}", id))?;
            let buffers = store
                .load_buffers(&id)
                .await
                .with_context(|| format!("Failed to load buffers for {}", id))?;
            print!("{}", format_report(&record, &buffers));
            Ok(())
        }
        Command::Delete { id } => {
            store
                .delete(&id)
                .await
                .with_context(|| format!("Failed to delete recording {}", id))?;
            println!("Deleted {}", id);
            Ok(())
        }
    }
}

async fn run_demo(
    config: RecorderConfig,
    store: &FileSessionStore,
    target: String,
    options: CaptureOptions,
    duration: Duration,
    simulate_detach: bool,
) -> Result<()> {
    let media = Arc::new(SimulatedMediaBackend::new().with_stop_delay(Duration::from_millis(200)));
    let debugger = Arc::new(SimulatedDebuggerBackend::new());
    let page = Arc::new(SimulatedScriptHost::new());

    let recorder = RecorderBuilder::new(config)
        .with_media_backend(media)
        .with_debugger_backend(debugger.clone())
        .with_script_host(page.clone())
        .spawn()
        .context("Failed to start recorder")?;
    let mut events = recorder.subscribe("demo", EventFilter::All);

    let session_id = recorder
        .start(target, Some(options))
        .await
        .context("Failed to start recording")?;
    println!("Recording {}", session_id);

    page.console("info", vec![json!("checkout page loaded")]);
    page.dom_batch(vec![json!({"type": 2, "data": {"node": "document"}})]);
    debugger.emit_request("1000.1", "https://api.example.com/cart", 200);
    page.console("warn", vec![json!("slow response"), json!({"ms": 1840})]);
    page.buffer_dom(vec![json!({"type": 3, "data": {"source": "click"}})]);

    tokio::select! {
        _ = tokio::time::sleep(duration / 2) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping early"),
    }

    if simulate_detach {
        debugger.detach_unexpectedly("canceled_by_user");
    } else {
        page.console("error", vec![json!("Payment failed: 502 Bad Gateway")]);
        debugger.emit("Network.loadingFailed", json!({
            "requestId": "1000.2",
            "errorText": "net::ERR_CONNECTION_RESET",
            "canceled": false
        }));
        tokio::time::sleep(duration / 2).await;
        recorder.stop().await.context("Failed to stop recording")?;
    }

    let outcome = loop {
        match events.recv().await {
            Ok(RecorderEvent::RecordingStopped {
                error, persisted, ..
            }) => break (error, persisted),
            Ok(event) => info!("{}", event.description()),
            Err(e) => {
                warn!("Event stream ended: {}", e);
                break (None, false);
            }
        }
    };
    recorder.shutdown().await;

    match outcome {
        (error, true) => {
            let record = store.load_record(&session_id).await?;
            let buffers = store.load_buffers(&session_id).await?;
            print!("{}", format_report(&record, &buffers));
            if let Some(error) = error {
                println!("Session ended with error: {}", error);
            }
        }
        (error, false) => println!(
            "Session not persisted: {}",
            error.unwrap_or_else(|| "unknown".to_string())
        ),
    }
    Ok(())
}

fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

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
        .unwrap_or_else(|_| EnvFilter::new(format!("bugrecorder={}", log_level)));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(match args.log_format.as_deref() {
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
            .with_file(false)
            .with_line_number(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    });

    let guard = match &args.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "bugrecorder.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().with_writer(writer).with_ansi(false).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .try_init()
        .context("Failed to initialise logging")?;

    Ok(guard)
}

/// Print default configuration in TOML format
fn print_default_config() -> Result<()> {
    let rendered = toml::to_string_pretty(&RecorderConfig::default())
        .context("Failed to render default configuration")?;
    println!("# Bugrecorder Configuration File");
    println!("# Environment overrides use BUGRECORDER_<SECTION>__<KEY>, e.g. BUGRECORDER_STORAGE__PATH");
    println!();
    println!("{}", rendered);
    Ok(())
}
