use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::{error, info};

use panel_tester::config::TelemetryConfig;
use panel_tester::devices::ina219;
use panel_tester::devices::{LogIndicator, SimAdc, SimI2c, SimIna219};
use panel_tester::logging::{level_from_verbosity, setup_logging};
use panel_tester::repl;
use panel_tester::supervisor::{RestartPolicy, supervise};
use panel_tester::telemetry::FieldSet;
use panel_tester::telemetry::clock::SystemClock;
use panel_tester::{Telemetry, TelemetryError};

#[derive(Parser, Debug)]
#[command(name = "panel-tester")]
#[command(about = "Solar panel test rig: INA219 + ADC telemetry as JSON lines")]
struct Args {
    #[command(subcommand)]
    mode: Option<Mode>,

    /// JSON configuration file; missing keys keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Reporting period in milliseconds
    #[arg(long)]
    period_ms: Option<u32>,

    /// Comma-separated report keys, e.g. current_mA,bus_voltage_mV
    #[arg(long)]
    fields: Option<String>,

    /// Give up after this many restarts (default: restart forever)
    #[arg(long)]
    max_restarts: Option<u32>,

    /// Pause between restarts in milliseconds
    #[arg(long, default_value_t = 0)]
    restart_backoff_ms: u64,

    #[command(flatten)]
    sim: SimArgs,

    /// Directory for the rolling log file
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Mode {
    /// Report forever (default)
    Run,
    /// Interactive command prompt
    Repl,
    /// Scan the sensor bus once and list what answers
    Scan,
}

/// Readings presented by the simulated bench
#[derive(clap::Args, Debug)]
struct SimArgs {
    /// Simulated panel bus voltage in mV
    #[arg(long, default_value_t = 5000.0)]
    sim_bus_mv: f64,

    /// Simulated panel current in mA
    #[arg(long, default_value_t = 120.0)]
    sim_current_ma: f64,

    /// Simulated raw ADC code on the divider input
    #[arg(long, default_value_t = 20_000)]
    sim_adc_raw: u16,
}

type Bench = (SimI2c, SimAdc, LogIndicator, SystemClock);

/// Fresh peripherals, as after a power-on.
fn bench(sim: &SimArgs, address: u8) -> Bench {
    let sensor = SimIna219::new();
    sensor.handle().set_reading(sim.sim_bus_mv, sim.sim_current_ma);
    let bus = SimI2c::new().with_device(address, sensor);
    (
        bus,
        SimAdc::new(sim.sim_adc_raw),
        LogIndicator::default(),
        SystemClock::new(),
    )
}

fn load_config(args: &Args) -> Result<TelemetryConfig> {
    let mut config = match &args.config {
        Some(path) => TelemetryConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TelemetryConfig::default(),
    };
    if let Some(period_ms) = args.period_ms {
        config.period_ms = period_ms;
    }
    if let Some(fields) = &args.fields {
        config.fields = FieldSet::parse_list(fields).context("Invalid --fields")?;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

type SimTelemetry = Telemetry<SimI2c, SimAdc, LogIndicator, SystemClock>;

fn start(args: &Args, config: &TelemetryConfig) -> Result<SimTelemetry, TelemetryError> {
    let (bus, adc, led, clock) = bench(&args.sim, config.sensor_address);
    Ok(Telemetry::start(bus, adc, led, clock, config.clone())?)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _guard = setup_logging(&args.log_dir, "panel-tester.log", level_from_verbosity(args.verbose));
    info!("Starting application");

    let config = load_config(&args)?;
    info!("Configuration: {:?}", config);
    let policy = RestartPolicy {
        max_restarts: args.max_restarts,
        backoff_ms: args.restart_backoff_ms,
    };

    match args.mode.unwrap_or(Mode::Run) {
        Mode::Run => {
            let result = supervise(policy, |_| {
                let mut telemetry = start(&args, &config)?;
                let mut out = io::stdout().lock();
                telemetry.run(&mut out)
            });
            let err = match result {
                Ok(never) => match never {},
                Err(err) => err,
            };
            error!("Telemetry stopped: {}", err);
            return Err(err.into());
        }
        Mode::Repl => {
            supervise(policy, |_| {
                let mut telemetry = start(&args, &config)?;
                let mut out = io::stdout().lock();
                repl::run_session(&mut telemetry, io::stdin().lock(), &mut out)
            })
            .context("Command prompt stopped")?;
        }
        Mode::Scan => {
            let (mut bus, ..) = bench(&args.sim, config.sensor_address);
            let found = ina219::scan(&mut bus).context("Bus scan failed")?;
            println!("Found {} devices: {:02X?}", found.len(), found);
        }
    }

    info!("Application shutting down");
    Ok(())
}
