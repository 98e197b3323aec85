use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

pub const DEFAULT_START_MARKER: &str = "r2r_value,bus_voltage_V,current_mA,shunt_voltage_mV,shunt_adc";
pub const DEFAULT_STOP_MARKER: &str = "Done test_current_at_each_r2r_value()";

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
}

/// Copies the lines between a start marker and a stop marker.
///
/// The device output is opaque: lines are compared with the markers after
/// trimming and otherwise written through untouched. Neither marker is
/// written.
#[derive(Debug, Clone)]
pub struct CaptureSession {
    pub start_marker: String,
    pub stop_marker: String,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self {
            start_marker: DEFAULT_START_MARKER.to_string(),
            stop_marker: DEFAULT_STOP_MARKER.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSummary {
    pub lines: usize,
    pub started: bool,
    pub stopped_by_marker: bool,
}

impl CaptureSession {
    pub fn run<L, W>(
        &self,
        lines: L,
        sink: &mut W,
        mut echo: Option<&mut dyn Write>,
    ) -> Result<CaptureSummary, CaptureError>
    where
        L: IntoIterator<Item = io::Result<String>>,
        W: Write,
    {
        let mut summary = CaptureSummary {
            lines: 0,
            started: false,
            stopped_by_marker: false,
        };

        for line in lines {
            let line = line?;
            let line = line.trim();

            if !summary.started {
                if line == self.start_marker {
                    info!("Start marker seen, capturing");
                    summary.started = true;
                }
                continue;
            }
            if line == self.stop_marker {
                info!("Stop marker seen after {} lines", summary.lines);
                if let Some(echo) = echo.as_mut() {
                    writeln!(echo, "end of test")?;
                }
                summary.stopped_by_marker = true;
                break;
            }

            writeln!(sink, "{}", line)?;
            if let Some(echo) = echo.as_mut() {
                writeln!(echo, "{}", line)?;
            }
            summary.lines += 1;
        }

        sink.flush()?;
        if !summary.stopped_by_marker {
            warn!(
                "Input ended before the stop marker (started: {}, {} lines)",
                summary.started, summary.lines
            );
        }
        Ok(summary)
    }
}

/// Shape of a captured file, read back as headerless CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsvShape {
    pub rows: usize,
    pub max_columns: usize,
}

pub fn inspect_csv(path: &Path) -> Result<CsvShape, CaptureError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;
    let mut shape = CsvShape {
        rows: 0,
        max_columns: 0,
    };
    for record in reader.records() {
        let record = record?;
        shape.rows += 1;
        shape.max_columns = shape.max_columns.max(record.len());
    }
    Ok(shape)
}

/// `logs/capture_<local time>.csv` under the working directory.
pub fn default_capture_path() -> io::Result<PathBuf> {
    let name = chrono::Local::now()
        .format("capture_%Y-%m-%d_%H-%M-%S.csv")
        .to_string();

    let mut path = std::env::current_dir()?;
    path.push("logs");
    std::fs::create_dir_all(&path)?;
    path.push(name);
    Ok(path)
}

pub fn create_capture_file(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    File::create(path)
}
