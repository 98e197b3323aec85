use std::io::{self, BufRead, BufReader, ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_BAUD: u32 = 115_200;

/// How long a single read waits before reporting a timeout.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum SerialError {
    #[error("Serial port error: {0}")]
    Port(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("No serial ports found")]
    NoPorts,

    #[error("Invalid port selection: {0}")]
    BadSelection(String),
}

pub fn open(path: &str, baud: u32) -> Result<Box<dyn SerialPort>, SerialError> {
    info!("Opening serial port: {} at {} bps", path, baud);
    let port = serialport::new(path, baud).timeout(READ_TIMEOUT).open()?;
    Ok(port)
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>, SerialError> {
    let ports = serialport::available_ports()?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// Pick a port: the only one if there is just one, otherwise ask.
///
/// The operator may answer with the list number or the port name.
pub fn choose_from<R: BufRead, W: Write>(
    ports: &[String],
    mut input: R,
    out: &mut W,
) -> Result<String, SerialError> {
    match ports {
        [] => Err(SerialError::NoPorts),
        [only] => {
            info!("Using the only serial port available: {}", only);
            Ok(only.clone())
        }
        _ => {
            writeln!(out, "Select serial port:")?;
            for (i, name) in ports.iter().enumerate() {
                writeln!(out, "  {}) {}", i + 1, name)?;
            }
            write!(out, "> ")?;
            out.flush()?;

            let mut answer = String::new();
            input.read_line(&mut answer)?;
            let answer = answer.trim();
            if let Some(name) = ports.iter().find(|name| name.as_str() == answer) {
                return Ok(name.clone());
            }
            answer
                .parse::<usize>()
                .ok()
                .and_then(|n| n.checked_sub(1))
                .and_then(|i| ports.get(i))
                .cloned()
                .ok_or_else(|| SerialError::BadSelection(answer.to_string()))
        }
    }
}

pub fn choose_port<R: BufRead, W: Write>(input: R, out: &mut W) -> Result<String, SerialError> {
    choose_from(&available_ports()?, input, out)
}

/// Whitespace-trimmed text lines from a link whose reads time out.
///
/// Timeouts are not errors: partial data is kept and reading resumes. With an
/// idle limit set, the stream ends once nothing has arrived for that long.
pub struct TimeoutTolerantLines<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    idle_limit: Option<Duration>,
    last_data: Instant,
    done: bool,
}

impl<R: Read> TimeoutTolerantLines<R> {
    pub fn new(reader: R) -> Self {
        TimeoutTolerantLines {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            idle_limit: None,
            last_data: Instant::now(),
            done: false,
        }
    }

    pub fn with_idle_limit(mut self, limit: Duration) -> Self {
        self.idle_limit = Some(limit);
        self
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.buf).trim().to_string();
        self.buf.clear();
        line
    }
}

impl<R: Read> Iterator for TimeoutTolerantLines<R> {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            let before = self.buf.len();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    self.done = true;
                    return (!self.buf.is_empty()).then(|| Ok(self.take_line()));
                }
                Ok(_) if self.buf.ends_with(b"\n") => {
                    self.last_data = Instant::now();
                    return Some(Ok(self.take_line()));
                }
                Ok(_) => {
                    self.last_data = Instant::now();
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    if self.buf.len() > before {
                        self.last_data = Instant::now();
                    }
                    if let Some(limit) = self.idle_limit {
                        if self.last_data.elapsed() >= limit {
                            debug!("Serial link idle for {:?}, stopping", limit);
                            self.done = true;
                            return (!self.buf.is_empty()).then(|| Ok(self.take_line()));
                        }
                    }
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Replays chunks, answering `TimedOut` for every `None`.
    struct Flaky {
        chunks: VecDeque<Option<&'static [u8]>>,
    }

    impl Read for Flaky {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.chunks.pop_front() {
                Some(Some(chunk)) => {
                    buf[..chunk.len()].copy_from_slice(chunk);
                    Ok(chunk.len())
                }
                Some(None) => Err(io::Error::new(ErrorKind::TimedOut, "timed out")),
                None => Ok(0),
            }
        }
    }

    #[test]
    fn lines_survive_timeouts_mid_line() {
        let reader = Flaky {
            chunks: VecDeque::from(vec![
                Some(&b"12,3."[..]),
                None,
                Some(&b"5\r\nnext"[..]),
                None,
                None,
                Some(&b" line\n"[..]),
            ]),
        };
        let lines: Vec<String> = TimeoutTolerantLines::new(reader)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(lines, vec!["12,3.5", "next line"]);
    }

    #[test]
    fn idle_limit_ends_stream() {
        let reader = Flaky {
            chunks: VecDeque::from(vec![Some(&b"a\n"[..]), None, Some(&b"b\n"[..])]),
        };
        let lines: Vec<String> = TimeoutTolerantLines::new(reader)
            .with_idle_limit(Duration::ZERO)
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(lines, vec!["a"]);
    }

    #[test]
    fn single_port_is_chosen_without_asking() {
        let mut out = Vec::new();
        let port = choose_from(&["/dev/ttyACM0".to_string()], "".as_bytes(), &mut out).unwrap();
        assert_eq!(port, "/dev/ttyACM0");
        assert!(out.is_empty());
    }

    #[test]
    fn operator_picks_by_number_or_name() {
        let ports = vec!["COM3".to_string(), "COM7".to_string()];
        let mut out = Vec::new();
        assert_eq!(choose_from(&ports, "2\n".as_bytes(), &mut out).unwrap(), "COM7");
        assert_eq!(choose_from(&ports, "COM3\n".as_bytes(), &mut out).unwrap(), "COM3");
        assert!(matches!(
            choose_from(&ports, "9\n".as_bytes(), &mut out),
            Err(SerialError::BadSelection(_))
        ));
        assert!(String::from_utf8(out).unwrap().contains("2) COM7"));
    }

    #[test]
    fn no_ports_is_an_error() {
        let mut out = Vec::new();
        assert!(matches!(
            choose_from(&[], "".as_bytes(), &mut out),
            Err(SerialError::NoPorts)
        ));
    }
}
