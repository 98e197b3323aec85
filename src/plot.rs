use std::io;
use std::path::{Path, PathBuf};

use csv::Writer;
use plotters::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::capture::DEFAULT_START_MARKER;

pub const COLUMNS: [&str; 5] = [
    "dac_value",
    "bus_voltage_V",
    "current_mA",
    "shunt_voltage_mV",
    "shunt_adc",
];

#[derive(Error, Debug)]
pub enum PlotError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("Line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("No data rows to plot")]
    Empty,

    #[error("Render error: {0}")]
    RenderError(String),
}

/// One row of a DAC sweep as the sweep firmware prints it.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct PanelRow {
    pub dac_value: f64,
    #[serde(rename = "bus_voltage_V")]
    pub bus_voltage_v: f64,
    #[serde(rename = "current_mA")]
    pub current_ma: f64,
    #[serde(rename = "shunt_voltage_mV")]
    pub shunt_voltage_mv: f64,
    pub shunt_adc: f64,
}

/// Column names as written here, or as the sweep firmware prints them.
fn is_header(fields: &[&str]) -> bool {
    fields.iter().copied().eq(COLUMNS)
        || fields.iter().copied().eq(DEFAULT_START_MARKER.split(','))
}

/// Parse one comma-separated line. Blank lines and the column header give
/// `None`; anything that is not five numbers is an error.
pub fn parse_row(line_no: usize, line: &str) -> Result<Option<PanelRow>, PlotError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() != COLUMNS.len() {
        return Err(PlotError::ParseError {
            line: line_no,
            message: format!("expected {} columns, got {}: {:?}", COLUMNS.len(), fields.len(), line),
        });
    }
    if is_header(&fields) {
        return Ok(None);
    }

    let mut values = [0.0; 5];
    for ((slot, field), column) in values.iter_mut().zip(&fields).zip(COLUMNS) {
        *slot = field.parse::<f64>().map_err(|_| PlotError::ParseError {
            line: line_no,
            message: format!("{} value {:?} is not numeric", column, field),
        })?;
    }
    let [dac_value, bus_voltage_v, current_ma, shunt_voltage_mv, shunt_adc] = values;
    Ok(Some(PanelRow {
        dac_value,
        bus_voltage_v,
        current_ma,
        shunt_voltage_mv,
        shunt_adc,
    }))
}

/// Accumulate rows until the stop marker, the row limit, or the end of input.
pub fn collect_rows<L>(
    lines: L,
    stop_marker: Option<&str>,
    max_rows: Option<usize>,
) -> Result<Vec<PanelRow>, PlotError>
where
    L: IntoIterator<Item = io::Result<String>>,
{
    let mut rows = Vec::new();
    for (index, line) in lines.into_iter().enumerate() {
        let line = line?;
        if stop_marker.is_some_and(|marker| line.trim() == marker) {
            info!("Stop marker seen after {} rows", rows.len());
            break;
        }
        if let Some(row) = parse_row(index + 1, &line)? {
            debug!("Row {:?}", row);
            rows.push(row);
        }
        if max_rows.is_some_and(|max| rows.len() >= max) {
            info!("Row limit of {} reached", rows.len());
            break;
        }
    }
    Ok(rows)
}

/// `<stem>_data.csv` and `<stem>_graph.png`.
pub fn output_paths(stem: &str) -> (PathBuf, PathBuf) {
    (
        PathBuf::from(format!("{}_data.csv", stem)),
        PathBuf::from(format!("{}_graph.png", stem)),
    )
}

/// Nothing is created when there are no rows.
pub fn write_table(path: &Path, rows: &[PanelRow]) -> Result<(), PlotError> {
    if rows.is_empty() {
        return Err(PlotError::Empty);
    }
    let mut writer = Writer::from_path(path)?;
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("Table saved to {}", path.display());
    Ok(())
}

/// Axis range covering `values` with a little margin; never empty.
fn padded_range(values: impl Iterator<Item = f64>) -> std::ops::Range<f64> {
    let (min, max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    let pad = if max > min { (max - min) * 0.05 } else { 1.0 };
    (min - pad)..(max + pad)
}

fn render_error<E: std::fmt::Display>(err: E) -> PlotError {
    PlotError::RenderError(err.to_string())
}

/// Scatter of current against bus voltage.
pub fn render_scatter(path: &Path, rows: &[PanelRow]) -> Result<(), PlotError> {
    if rows.is_empty() {
        return Err(PlotError::Empty);
    }
    let root = BitMapBackend::new(path, (1024, 768)).into_drawing_area();
    root.fill(&WHITE).map_err(render_error)?;

    let x_range = padded_range(rows.iter().map(|r| r.bus_voltage_v));
    let y_range = padded_range(rows.iter().map(|r| r.current_ma));

    let mut chart = ChartBuilder::on(&root)
        .caption("Current vs Bus Voltage", ("sans-serif", 24).into_font())
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(x_range, y_range)
        .map_err(render_error)?;

    chart
        .configure_mesh()
        .x_desc("Bus Voltage (V)")
        .y_desc("Current (mA)")
        .axis_desc_style(("sans-serif", 18))
        .draw()
        .map_err(render_error)?;

    chart
        .draw_series(
            rows.iter()
                .map(|r| Circle::new((r.bus_voltage_v, r.current_ma), 3, BLUE.filled())),
        )
        .map_err(render_error)?;

    root.present().map_err(render_error)?;
    info!("Plot saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_table(path: &Path) -> Vec<PanelRow> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader.deserialize().collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn parses_numeric_rows_and_skips_header() {
        assert_eq!(parse_row(1, "dac_value,bus_voltage_V,current_mA,shunt_voltage_mV,shunt_adc").unwrap(), None);
        assert_eq!(parse_row(2, "   ").unwrap(), None);
        assert_eq!(parse_row(2, DEFAULT_START_MARKER).unwrap(), None);
        let row = parse_row(3, "512, 4.25,12.5,1.25,125\r").unwrap().unwrap();
        assert_eq!(
            row,
            PanelRow {
                dac_value: 512.0,
                bus_voltage_v: 4.25,
                current_ma: 12.5,
                shunt_voltage_mv: 1.25,
                shunt_adc: 125.0,
            }
        );
    }

    #[test]
    fn rejects_wrong_width_and_text() {
        assert!(matches!(
            parse_row(7, "1,2,3"),
            Err(PlotError::ParseError { line: 7, .. })
        ));
        match parse_row(8, "1,2,abc,4,5") {
            Err(PlotError::ParseError { line, message }) => {
                assert_eq!(line, 8);
                assert!(message.contains("current_mA"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn collection_stops_at_marker_or_limit() {
        let lines = || {
            ["0,1,2,3,4", "1,1,2,3,4", "STOP", "2,1,2,3,4"]
                .into_iter()
                .map(|l| Ok::<_, io::Error>(l.to_string()))
        };
        assert_eq!(collect_rows(lines(), Some("STOP"), None).unwrap().len(), 2);
        assert_eq!(collect_rows(lines(), Some("STOP"), Some(1)).unwrap().len(), 1);
        assert!(matches!(
            collect_rows(lines(), None, None),
            Err(PlotError::ParseError { line: 3, .. })
        ));
    }

    #[test]
    fn table_round_trips_through_csv_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("panel_a");
        let (data_path, graph_path) = output_paths(stem.to_str().unwrap());
        assert!(graph_path.to_str().unwrap().ends_with("panel_a_graph.png"));

        let rows = vec![
            parse_row(1, "0,0.1,0.0,0.0,0").unwrap().unwrap(),
            parse_row(2, "4095,5.2,130.5,13.05,1305").unwrap().unwrap(),
        ];
        write_table(&data_path, &rows).unwrap();

        let text = std::fs::read_to_string(&data_path).unwrap();
        assert!(text.starts_with("dac_value,bus_voltage_V,current_mA,shunt_voltage_mV,shunt_adc\n"));
        assert_eq!(read_table(&data_path), rows);
    }

    #[test]
    fn firmware_header_does_not_end_collection() {
        let lines = [DEFAULT_START_MARKER, "0,0.1,0.0,0.0,0", "8,4.9,12.0,1.2,120"]
            .into_iter()
            .map(|l| Ok::<_, io::Error>(l.to_string()));
        let rows = collect_rows(lines, None, None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].dac_value, 8.0);
    }

    #[test]
    fn empty_sweep_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (data_path, graph_path) = output_paths(dir.path().join("empty").to_str().unwrap());
        assert!(matches!(write_table(&data_path, &[]), Err(PlotError::Empty)));
        assert!(matches!(render_scatter(&graph_path, &[]), Err(PlotError::Empty)));
        assert!(!data_path.exists());
        assert!(!graph_path.exists());
    }

    #[test]
    fn sweep_writes_table_and_graph() {
        let dir = tempfile::tempdir().unwrap();
        let (data_path, graph_path) = output_paths(dir.path().join("panel_b").to_str().unwrap());
        let rows: Vec<PanelRow> = (0..20)
            .map(|i| PanelRow {
                dac_value: (i * 200) as f64,
                bus_voltage_v: 5.5 - i as f64 * 0.25,
                current_ma: i as f64 * 6.5,
                shunt_voltage_mv: i as f64 * 0.65,
                shunt_adc: (i * 65) as f64,
            })
            .collect();

        write_table(&data_path, &rows).unwrap();
        render_scatter(&graph_path, &rows).unwrap();

        assert!(data_path.exists());
        assert!(std::fs::metadata(&graph_path).unwrap().len() > 0);
    }

    #[test]
    fn degenerate_ranges_are_padded() {
        let range = padded_range([3.0, 3.0].into_iter());
        assert!(range.start < 3.0 && range.end > 3.0);
        let range = padded_range([0.0, 10.0].into_iter());
        assert_eq!(range, -0.5..10.5);
    }
}
