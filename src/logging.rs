use std::path::Path;

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Daily rolling log file in `log_dir`, mirrored to stderr.
///
/// Stdout is left alone for reports. Keep the guard alive until exit or the
/// tail of the log is lost.
pub fn setup_logging(log_dir: &Path, file_name: &str, level: Level) -> WorkerGuard {
    let file_appender = rolling::daily(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    fmt()
        .with_writer(non_blocking.and(std::io::stderr))
        .with_max_level(level)
        .with_ansi(false)
        .with_level(true)
        .init();

    guard
}

/// `-v` count to level: info by default, so bus scan results always show.
pub fn level_from_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_level_shows_info() {
        assert_eq!(level_from_verbosity(0), Level::INFO);
        assert_eq!(level_from_verbosity(1), Level::DEBUG);
        assert_eq!(level_from_verbosity(2), Level::TRACE);
        assert_eq!(level_from_verbosity(9), Level::TRACE);
    }
}
