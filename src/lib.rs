pub mod capture;
pub mod config;
pub mod devices;
pub mod error;
pub mod logging;
pub mod plot;
pub mod repl;
pub mod serial;
pub mod supervisor;
pub mod telemetry;

pub use config::TelemetryConfig;
pub use error::{HardwareError, InitError, TelemetryError};
pub use telemetry::Telemetry;
