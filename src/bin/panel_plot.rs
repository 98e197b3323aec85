//! Read a DAC sweep from the serial link, save it and plot current against
//! bus voltage.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::info;

use panel_tester::capture::DEFAULT_STOP_MARKER;
use panel_tester::logging::{level_from_verbosity, setup_logging};
use panel_tester::plot;
use panel_tester::serial::{self, DEFAULT_BAUD, TimeoutTolerantLines};

#[derive(Parser, Debug)]
#[command(name = "panel-plot")]
#[command(about = "Plot current vs bus voltage from a panel sweep")]
struct Args {
    /// Output name; writes <filename>_data.csv and <filename>_graph.png
    #[arg(short, long)]
    filename: Option<String>,

    /// Serial port path (e.g., COM1, /dev/ttyUSB0)
    #[arg(short, long)]
    port: Option<String>,

    #[arg(short, long, default_value_t = DEFAULT_BAUD)]
    baud: u32,

    /// Stop after this many data rows
    #[arg(long)]
    max_rows: Option<usize>,

    /// Stop once the port has been silent this long
    #[arg(long, default_value_t = 10)]
    idle_timeout_s: u64,

    #[arg(long, default_value = DEFAULT_STOP_MARKER)]
    stop_marker: String,

    /// Directory for the rolling log file
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn prompt(question: &str) -> Result<String> {
    print!("{}", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_string();
    if answer.is_empty() {
        bail!("No answer given to: {}", question.trim());
    }
    Ok(answer)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = setup_logging(&args.log_dir, "panel-plot.log", level_from_verbosity(args.verbose));

    let filename = match &args.filename {
        Some(name) => name.clone(),
        None => prompt("Enter filename to save data and graph: ")?,
    };
    let port_name = match &args.port {
        Some(port) => port.clone(),
        None => prompt("Enter serial port (e.g., COM1, /dev/ttyUSB0): ")?,
    };

    let port = serial::open(&port_name, args.baud)
        .with_context(|| format!("Failed to open serial port {}", port_name))?;
    let lines = TimeoutTolerantLines::new(port)
        .with_idle_limit(Duration::from_secs(args.idle_timeout_s));
    let rows = plot::collect_rows(lines, Some(args.stop_marker.as_str()), args.max_rows)
        .context("Failed to read sweep data")?;
    if rows.is_empty() {
        bail!("No sweep rows received from {}; nothing written", port_name);
    }
    info!("Collected {} rows from {}", rows.len(), port_name);

    let (data_path, graph_path) = plot::output_paths(&filename);
    plot::write_table(&data_path, &rows)
        .with_context(|| format!("Failed to write {}", data_path.display()))?;
    plot::render_scatter(&graph_path, &rows)
        .with_context(|| format!("Failed to render {}", graph_path.display()))?;

    println!(
        "Saved {} rows to {} and plot to {}",
        rows.len(),
        data_path.display(),
        graph_path.display()
    );
    Ok(())
}
