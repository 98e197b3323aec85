//! Interactive command prompt.
//!
//! Commands come from a fixed table; nothing typed at the prompt is ever
//! evaluated as code. This is the one place where errors are reported and
//! swallowed instead of propagated.

use std::io::{BufRead, Write};

use embedded_hal::i2c::I2c;
use thiserror::Error;
use tracing::{info, warn};

use crate::devices::adc::AnalogInput;
use crate::devices::led::StatusIndicator;
use crate::error::Result;
use crate::telemetry::Telemetry;
use crate::telemetry::clock::{Clock, MAX_WINDOW_MS};

pub const PROMPT: &str = "Enter a command, or use 'help':";

pub const HELP: &str = "
Available commands:
    - exit()  # Ends the prompt.
    - init() AKA reset()
    - read_adc_voltage
    - log_ina_json(timestamp_ms: int = None)
    - sleep_ms_and_log_ina_json(sleep_time_ms: int, log_period_ms: int = 250)
    - sleep_ms_and_get_ina_stats(sleep_time_ms: int)
";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Malformed command: {0}")]
    Malformed(String),

    #[error("{command}() takes {expected}, got {got} argument(s)")]
    WrongArity {
        command: &'static str,
        expected: &'static str,
        got: usize,
    },

    #[error("{command}(): {message}")]
    BadArgument {
        command: &'static str,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Init,
    ReadAdcVoltage,
    LogJson { timestamp_ms: Option<u32> },
    TimedLog { duration_ms: u32, period_ms: Option<u32> },
    Stats { duration_ms: u32 },
    Help,
    Exit,
}

#[derive(Debug)]
struct Arg<'a> {
    name: Option<&'a str>,
    value: &'a str,
}

impl Command {
    /// Parse a bare name or a call expression such as `f(1000, log_period_ms=100)`.
    pub fn parse(input: &str) -> std::result::Result<Command, CommandError> {
        let input = input.trim();
        let (name, args) = match input.find('(') {
            None if input.contains(')') => return Err(CommandError::Malformed(input.to_string())),
            None => (input, Vec::new()),
            Some(open) => {
                let inner = input[open + 1..]
                    .strip_suffix(')')
                    .ok_or_else(|| CommandError::Malformed(input.to_string()))?;
                if inner.contains(['(', ')']) {
                    return Err(CommandError::Malformed(input.to_string()));
                }
                (input[..open].trim(), split_args(input, inner)?)
            }
        };

        match name {
            "init" | "reset" => {
                no_args("init", &args)?;
                Ok(Command::Init)
            }
            "read_adc_voltage" => {
                no_args("read_adc_voltage", &args)?;
                Ok(Command::ReadAdcVoltage)
            }
            "log_ina_json" => {
                const NAME: &str = "log_ina_json";
                let [timestamp] = bind(NAME, &args, &["timestamp_ms"], "at most 1")?;
                Ok(Command::LogJson {
                    timestamp_ms: timestamp.map(|v| parse_ms(NAME, v)).transpose()?,
                })
            }
            "sleep_ms_and_log_ina_json" => {
                const NAME: &str = "sleep_ms_and_log_ina_json";
                let [duration, period] = bind(
                    NAME,
                    &args,
                    &["sleep_time_ms", "log_period_ms"],
                    "1 or 2",
                )?;
                let duration = duration.ok_or(CommandError::WrongArity {
                    command: NAME,
                    expected: "1 or 2",
                    got: args.len(),
                })?;
                let period_ms = period.map(|v| parse_window_ms(NAME, v)).transpose()?;
                if period_ms == Some(0) {
                    return Err(CommandError::BadArgument {
                        command: NAME,
                        message: "log_period_ms must be positive".into(),
                    });
                }
                Ok(Command::TimedLog {
                    duration_ms: parse_window_ms(NAME, duration)?,
                    period_ms,
                })
            }
            "sleep_ms_and_get_ina_stats" => {
                const NAME: &str = "sleep_ms_and_get_ina_stats";
                let [duration] = bind(NAME, &args, &["sleep_time_ms"], "exactly 1")?;
                let duration = duration.ok_or(CommandError::WrongArity {
                    command: NAME,
                    expected: "exactly 1",
                    got: 0,
                })?;
                Ok(Command::Stats {
                    duration_ms: parse_window_ms(NAME, duration)?,
                })
            }
            "help" => {
                no_args("help", &args)?;
                Ok(Command::Help)
            }
            "exit" => {
                no_args("exit", &args)?;
                Ok(Command::Exit)
            }
            other => Err(CommandError::UnknownCommand(other.to_string())),
        }
    }

    /// Run against live hardware, writing any output to `out`.
    pub fn execute<I, A, L, C, W>(self, telemetry: &mut Telemetry<I, A, L, C>, out: &mut W) -> Result<()>
    where
        I: I2c,
        A: AnalogInput,
        L: StatusIndicator,
        C: Clock,
        W: Write,
    {
        match self {
            Command::Init => {
                telemetry.init()?;
                writeln!(out, "Init complete.")?;
            }
            Command::ReadAdcVoltage => {
                let volts = telemetry.read_adc_voltage()?;
                writeln!(out, "{}", volts)?;
            }
            Command::LogJson { timestamp_ms } => {
                telemetry.log_json(out, timestamp_ms)?;
            }
            Command::TimedLog {
                duration_ms,
                period_ms,
            } => {
                let period_ms = period_ms.unwrap_or(telemetry.config().log_period_ms);
                telemetry.sleep_ms_and_log_json(out, duration_ms, period_ms)?;
            }
            Command::Stats { duration_ms } => {
                let stats = telemetry.sleep_ms_and_get_stats(duration_ms)?;
                writeln!(out, "{}", serde_json::to_string(&stats)?)?;
            }
            Command::Help => write!(out, "{}", HELP)?,
            Command::Exit => {}
        }
        Ok(())
    }
}

fn split_args<'a>(input: &str, inner: &'a str) -> std::result::Result<Vec<Arg<'a>>, CommandError> {
    if inner.trim().is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return Err(CommandError::Malformed(input.to_string()));
            }
            Ok(match part.split_once('=') {
                Some((name, value)) => Arg {
                    name: Some(name.trim()),
                    value: value.trim(),
                },
                None => Arg {
                    name: None,
                    value: part,
                },
            })
        })
        .collect()
}

fn no_args(command: &'static str, args: &[Arg<'_>]) -> std::result::Result<(), CommandError> {
    if args.is_empty() {
        Ok(())
    } else {
        Err(CommandError::WrongArity {
            command,
            expected: "no arguments",
            got: args.len(),
        })
    }
}

/// Bind positional then keyword arguments onto parameter slots.
fn bind<'a, const N: usize>(
    command: &'static str,
    args: &[Arg<'a>],
    params: &[&str; N],
    expected: &'static str,
) -> std::result::Result<[Option<&'a str>; N], CommandError> {
    if args.len() > N {
        return Err(CommandError::WrongArity {
            command,
            expected,
            got: args.len(),
        });
    }
    let mut slots = [None; N];
    let mut seen_keyword = false;
    for (position, arg) in args.iter().enumerate() {
        let index = match arg.name {
            None if seen_keyword => {
                return Err(CommandError::BadArgument {
                    command,
                    message: "positional argument follows keyword argument".into(),
                });
            }
            None => position,
            Some(name) => {
                seen_keyword = true;
                params
                    .iter()
                    .position(|param| *param == name || (*param == "log_period_ms" && name == "period_ms"))
                    .ok_or_else(|| CommandError::BadArgument {
                        command,
                        message: format!("unexpected keyword argument '{}'", name),
                    })?
            }
        };
        if slots[index].replace(arg.value).is_some() {
            return Err(CommandError::BadArgument {
                command,
                message: format!("multiple values for '{}'", params[index]),
            });
        }
    }
    Ok(slots)
}

fn parse_ms(command: &'static str, value: &str) -> std::result::Result<u32, CommandError> {
    value
        .replace('_', "")
        .parse::<u32>()
        .map_err(|e| CommandError::BadArgument {
            command,
            message: format!("'{}' is not a millisecond count: {}", value, e),
        })
}

/// A sampling window or period; must fit the signed tick difference.
fn parse_window_ms(command: &'static str, value: &str) -> std::result::Result<u32, CommandError> {
    let ms = parse_ms(command, value)?;
    if ms > MAX_WINDOW_MS {
        return Err(CommandError::BadArgument {
            command,
            message: format!("{} ms exceeds the longest window of {} ms", ms, MAX_WINDOW_MS),
        });
    }
    Ok(ms)
}

/// What the prompt loop should do after handling one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Exit,
}

/// Handle one line of operator input.
///
/// Parse and execution failures are written to `out` as `Error: ...` and do
/// not end the session. Only failures writing to `out` itself escape.
pub fn handle_line<I, A, L, C, W>(
    telemetry: &mut Telemetry<I, A, L, C>,
    line: &str,
    out: &mut W,
) -> Result<Flow>
where
    I: I2c,
    A: AnalogInput,
    L: StatusIndicator,
    C: Clock,
    W: Write,
{
    let mut command = line.trim().to_string();
    if command == "exit" {
        writeln!(out, "Exiting.")?;
        return Ok(Flow::Exit);
    }
    if !command.contains(['(', ')']) {
        command.push_str("()");
    }
    writeln!(out, "Executing command: {}\n", command)?;
    info!("Executing command: {}", command);

    let outcome = match Command::parse(&command) {
        Ok(Command::Exit) => {
            writeln!(out, "Exiting.")?;
            return Ok(Flow::Exit);
        }
        Ok(parsed) => parsed.execute(telemetry, out).map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    if let Err(message) = outcome {
        warn!("Command {} failed: {}", command, message);
        writeln!(out, "Error: {}", message)?;
    }
    writeln!(out)?;
    out.flush()?;
    Ok(Flow::Continue)
}

/// Prompt, read, dispatch until `exit` or end of input.
pub fn run_session<I, A, L, C, R, W>(
    telemetry: &mut Telemetry<I, A, L, C>,
    mut input: R,
    out: &mut W,
) -> Result<()>
where
    I: I2c,
    A: AnalogInput,
    L: StatusIndicator,
    C: Clock,
    R: BufRead,
    W: Write,
{
    let mut line = String::new();
    loop {
        writeln!(out, "{}", PROMPT)?;
        write!(out, ">> ")?;
        out.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            info!("End of input, leaving prompt");
            return Ok(());
        }
        if handle_line(telemetry, &line, out)? == Flow::Exit {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelemetryConfig;
    use crate::devices::ina219::DEFAULT_ADDRESS;
    use crate::devices::led::RecordingIndicator;
    use crate::devices::sim::{PanelHandle, SimAdc, SimI2c, SimIna219};
    use crate::telemetry::clock::ManualClock;

    fn rig() -> (
        Telemetry<SimI2c, SimAdc, RecordingIndicator, ManualClock>,
        PanelHandle,
    ) {
        let sensor = SimIna219::new();
        let panel = sensor.handle();
        panel.set_reading(5_000.0, 20.0);
        let bus = SimI2c::new().with_device(DEFAULT_ADDRESS, sensor);
        let telemetry = Telemetry::start(
            bus,
            SimAdc::new(0),
            RecordingIndicator::new(),
            ManualClock::starting_at(0).with_step_per_read(1),
            TelemetryConfig::default(),
        )
        .unwrap();
        (telemetry, panel)
    }

    #[test]
    fn parses_the_command_table() {
        assert_eq!(Command::parse("init()"), Ok(Command::Init));
        assert_eq!(Command::parse("reset ( )"), Ok(Command::Init));
        assert_eq!(Command::parse("read_adc_voltage()"), Ok(Command::ReadAdcVoltage));
        assert_eq!(
            Command::parse("log_ina_json()"),
            Ok(Command::LogJson { timestamp_ms: None })
        );
        assert_eq!(
            Command::parse("log_ina_json(17)"),
            Ok(Command::LogJson {
                timestamp_ms: Some(17)
            })
        );
        assert_eq!(
            Command::parse("sleep_ms_and_log_ina_json(1_000)"),
            Ok(Command::TimedLog {
                duration_ms: 1000,
                period_ms: None
            })
        );
        assert_eq!(
            Command::parse("sleep_ms_and_log_ina_json(2000, log_period_ms=100)"),
            Ok(Command::TimedLog {
                duration_ms: 2000,
                period_ms: Some(100)
            })
        );
        assert_eq!(
            Command::parse("sleep_ms_and_log_ina_json(period_ms=50, sleep_time_ms=300)"),
            Ok(Command::TimedLog {
                duration_ms: 300,
                period_ms: Some(50)
            })
        );
        assert_eq!(
            Command::parse("sleep_ms_and_get_ina_stats(500)"),
            Ok(Command::Stats { duration_ms: 500 })
        );
        assert_eq!(Command::parse("help()"), Ok(Command::Help));
        assert_eq!(Command::parse("exit()"), Ok(Command::Exit));
    }

    #[test]
    fn rejects_anything_outside_the_table() {
        assert!(matches!(
            Command::parse("import os()"),
            Err(CommandError::UnknownCommand(_))
        ));
        assert!(matches!(
            Command::parse("print(open('x'))"),
            Err(CommandError::Malformed(_))
        ));
        assert!(matches!(
            Command::parse("init(1)"),
            Err(CommandError::WrongArity { got: 1, .. })
        ));
        assert!(matches!(
            Command::parse("sleep_ms_and_log_ina_json()"),
            Err(CommandError::WrongArity { .. })
        ));
        assert!(matches!(
            Command::parse("sleep_ms_and_log_ina_json(1, 2, 3)"),
            Err(CommandError::WrongArity { got: 3, .. })
        ));
        assert!(matches!(
            Command::parse("sleep_ms_and_log_ina_json(-5)"),
            Err(CommandError::BadArgument { .. })
        ));
        assert!(matches!(
            Command::parse("sleep_ms_and_log_ina_json(100, 0)"),
            Err(CommandError::BadArgument { .. })
        ));
        assert!(matches!(
            Command::parse("sleep_ms_and_log_ina_json(log_period_ms=5, 100)"),
            Err(CommandError::BadArgument { .. })
        ));
        assert!(matches!(
            Command::parse("sleep_ms_and_log_ina_json(100, sleep_time_ms=5)"),
            Err(CommandError::BadArgument { .. })
        ));
        assert!(matches!(
            Command::parse("sleep_ms_and_log_ina_json(1000, 3000000000)"),
            Err(CommandError::BadArgument { .. })
        ));
        assert!(matches!(
            Command::parse("sleep_ms_and_get_ina_stats(2_147_483_648)"),
            Err(CommandError::BadArgument { .. })
        ));
        assert_eq!(
            Command::parse("sleep_ms_and_get_ina_stats(2_147_483_647)"),
            Ok(Command::Stats {
                duration_ms: 2_147_483_647
            })
        );
        assert!(matches!(
            Command::parse("log_ina_json(1,)"),
            Err(CommandError::Malformed(_))
        ));
        assert!(matches!(
            Command::parse("log_ina_json"),
            Ok(Command::LogJson { timestamp_ms: None })
        ));
    }

    #[test]
    fn session_runs_commands_and_survives_errors() {
        let (mut telemetry, _panel) = rig();
        let input = "help\nbogus\nlog_ina_json(5)\nsleep_ms_and_log_ina_json(500)\nexit\nhelp\n";
        let mut out = Vec::new();
        run_session(&mut telemetry, input.as_bytes(), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("Available commands:"));
        assert!(text.contains("Executing command: bogus()"));
        assert!(text.contains("Error: Unknown command: bogus"));
        assert!(text.contains(r#""timestamp_ms":5}"#));
        let timed = text
            .lines()
            .filter(|l| l.starts_with('{') && l.contains("timestamp_ms"))
            .count();
        assert_eq!(timed, 1 + 2);
        assert!(text.contains("Exiting."));
        // Nothing after exit was run.
        assert_eq!(text.matches("Available commands:").count(), 1);
        assert_eq!(text.matches(PROMPT).count(), 5);
    }

    #[test]
    fn hardware_failure_is_reported_not_propagated() {
        let (mut telemetry, panel) = rig();
        panel.set_fault(true);
        let mut out = Vec::new();
        let flow = handle_line(&mut telemetry, "log_ina_json", &mut out).unwrap();
        assert_eq!(flow, Flow::Continue);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Error: Hardware read failed"), "{text}");

        panel.set_fault(false);
        let mut out = Vec::new();
        handle_line(&mut telemetry, "reset", &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().contains("Init complete."));
    }

    #[test]
    fn stats_command_prints_json() {
        let (mut telemetry, _panel) = rig();
        let mut out = Vec::new();
        handle_line(&mut telemetry, "sleep_ms_and_get_ina_stats(10)", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let line = text.lines().find(|l| l.starts_with('{')).unwrap();
        let stats: serde_json::Value = serde_json::from_str(line).unwrap();
        assert!(stats["len"].as_u64().unwrap() >= 1);
        assert!((stats["avg"].as_f64().unwrap() - 20.0).abs() < 1e-9);
    }

    #[test]
    fn end_of_input_ends_session() {
        let (mut telemetry, _panel) = rig();
        let mut out = Vec::new();
        run_session(&mut telemetry, "".as_bytes(), &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().ends_with(">> "));
    }
}
