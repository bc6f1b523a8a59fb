//! sipscope - SIP call flow viewer

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::EnvFilter;

use sipscope::capture::{CaptureInput, PnetCapture};
use sipscope::config::LOG_FILE_NAME;
use sipscope::ui::{App, CaptureStatus};
use sipscope::{CallStore, CapturePipeline, Config};

#[derive(Parser)]
#[command(name = "sipscope")]
#[command(about = "SIP call flow viewer for capture files and live interfaces")]
struct Args {
    /// Read packets from a pcap or pcapng file
    #[arg(short = 'I', long = "input", conflicts_with = "device")]
    input: Option<PathBuf>,

    /// Capture live from a network interface (e.g., eth0)
    #[arg(short, long)]
    device: Option<String>,

    /// Config file (default: $SIPSCOPE_CONFIG or /etc/sipscope.conf)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Process the capture and print a call summary instead of the viewer
    #[arg(long)]
    no_ui: bool,

    /// List available network interfaces and exit
    #[arg(long)]
    list_interfaces: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.list_interfaces {
        println!("Available interfaces:");
        for iface in PnetCapture::list_interfaces() {
            println!("  {}", iface);
        }
        return ExitCode::SUCCESS;
    }

    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    let config = Config::load(args.config.as_deref()).context("Failed to load configuration")?;

    let input = match (args.input, args.device.or_else(|| config.interface.clone())) {
        (Some(path), _) => CaptureInput::File(path),
        (None, Some(iface)) => CaptureInput::Interface(iface),
        (None, None) => bail!("No capture source given; use -I FILE or -d INTERFACE"),
    };

    let _guard = init_logging(&config, args.no_ui)?;
    tracing::info!("Starting sipscope on {}", input);

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        tracing::info!("Received interrupt, stopping capture");
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl-C handler")?;

    let pipeline = CapturePipeline::new(config.capture_settings()).with_running(running.clone());

    if args.no_ui {
        run_headless(&pipeline, &input)
    } else {
        run_viewer(pipeline, input, running)
    }
}

/// Log to a file while the viewer owns the terminal, otherwise to stderr.
fn init_logging(config: &Config, to_stderr: bool) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .context("Invalid log filter")?;

    if to_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    }

    let log_dir = writable_log_dir(&config.log_dir);
    let file_appender = rolling::never(&log_dir, LOG_FILE_NAME);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .with_writer(non_blocking)
        .init();

    Ok(Some(guard))
}

/// The configured log directory, or the temp directory if it can't be
/// created (e.g. /var/log when running unprivileged on a capture file).
fn writable_log_dir(configured: &Path) -> PathBuf {
    match std::fs::create_dir_all(configured) {
        Ok(()) => configured.to_path_buf(),
        Err(e) => {
            let fallback = std::env::temp_dir();
            eprintln!(
                "Cannot use log directory {}: {}; logging to {}",
                configured.display(),
                e,
                fallback.display()
            );
            fallback
        }
    }
}

fn run_headless(pipeline: &CapturePipeline, input: &CaptureInput) -> Result<ExitCode> {
    let mut store = CallStore::new();
    let summary = match pipeline.run(input, &mut store) {
        Ok(summary) => summary,
        // Already logged to stderr by the pipeline
        Err(_) => return Ok(ExitCode::FAILURE),
    };

    for call in store.calls() {
        println!("{} ({} messages)", call.id(), call.len());
        for message in call.messages() {
            println!(
                "  {} {} -> {}  {}",
                message.timestamp, message.src, message.dst, message.summary
            );
        }
    }
    eprintln!("{}", summary);

    Ok(ExitCode::SUCCESS)
}

fn run_viewer(
    pipeline: CapturePipeline,
    input: CaptureInput,
    running: Arc<AtomicBool>,
) -> Result<ExitCode> {
    let (msg_tx, msg_rx) = mpsc::channel();
    let (status_tx, status_rx) = mpsc::channel();
    let store = CallStore::new().with_publisher(msg_tx);

    let mut capture_store = store.clone();
    let capture = thread::Builder::new()
        .name("capture".to_string())
        .spawn(move || {
            let _ = status_tx.send(CaptureStatus::Running(input.to_string()));
            let status = match pipeline.run(&input, &mut capture_store) {
                Ok(summary) => CaptureStatus::Finished(summary),
                Err(e) => CaptureStatus::Failed(e.to_string()),
            };
            // The viewer may already have quit
            let _ = status_tx.send(status);
        })
        .context("Failed to spawn capture thread")?;

    let mut app = App::new(store, msg_rx, status_rx, running.clone());
    let result = app.run().context("Terminal error");

    // Live reads wake up within the read timeout and see the cleared flag
    running.store(false, Ordering::SeqCst);
    if capture.join().is_err() {
        tracing::error!("Capture thread panicked");
    }

    result?;
    tracing::info!("sipscope stopped");
    Ok(ExitCode::SUCCESS)
}
