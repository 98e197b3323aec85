//! Copy a CSV test run from the serial link into a file.
//!
//! Waits for the CSV header line the sweep firmware prints, then writes every
//! following line until the firmware reports the sweep is done.

use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use panel_tester::capture::{
    self, CaptureSession, DEFAULT_START_MARKER, DEFAULT_STOP_MARKER,
};
use panel_tester::logging::{level_from_verbosity, setup_logging};
use panel_tester::serial::{self, DEFAULT_BAUD, TimeoutTolerantLines};

#[derive(Parser, Debug)]
#[command(name = "panel-capture")]
#[command(about = "Capture a CSV sweep from the panel tester's serial port")]
struct Args {
    /// Serial port path (e.g., /dev/ttyUSB0 or COM3); asks when omitted
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Output CSV file (default: logs/capture_<timestamp>.csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, default_value = DEFAULT_START_MARKER)]
    start_marker: String,

    #[arg(long, default_value = DEFAULT_STOP_MARKER)]
    stop_marker: String,

    /// Don't echo captured lines to the terminal
    #[arg(short, long)]
    quiet: bool,

    /// Directory for the rolling log file
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = setup_logging(&args.log_dir, "panel-capture.log", level_from_verbosity(args.verbose));

    let port_name = match &args.port {
        Some(port) => port.clone(),
        None => serial::choose_port(io::stdin().lock(), &mut io::stdout())
            .context("No serial port selected")?,
    };
    let port = serial::open(&port_name, args.baud)
        .with_context(|| format!("Failed to open serial port {}", port_name))?;

    let path = match &args.output {
        Some(path) => path.clone(),
        None => capture::default_capture_path().context("Failed to prepare logs directory")?,
    };
    let mut file = capture::create_capture_file(&path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    info!("Capturing from {} into {}", port_name, path.display());
    println!("Waiting for start marker on {}...", port_name);

    let session = CaptureSession {
        start_marker: args.start_marker.clone(),
        stop_marker: args.stop_marker.clone(),
    };
    let mut stdout = io::stdout();
    let echo: Option<&mut dyn io::Write> = if args.quiet { None } else { Some(&mut stdout) };
    let summary = session
        .run(TimeoutTolerantLines::new(port), &mut file, echo)
        .context("Capture failed")?;
    drop(file);

    if !summary.started {
        warn!("Start marker never seen; {} is empty", path.display());
    }
    let shape = capture::inspect_csv(&path)
        .with_context(|| format!("Captured file {} is not valid CSV", path.display()))?;
    println!(
        "Captured {} rows ({} columns) to {}",
        shape.rows,
        shape.max_columns,
        path.display()
    );
    Ok(())
}
