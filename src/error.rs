use thiserror::Error;

/// Failure talking to a peripheral once the rig is up.
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("I2C error: {0}")]
    I2c(embedded_hal::i2c::ErrorKind),

    #[error("ADC read failed: {0}")]
    Adc(String),
}

impl HardwareError {
    pub fn from_i2c<E: embedded_hal::i2c::Error>(err: E) -> Self {
        HardwareError::I2c(err.kind())
    }
}

/// Failure while bringing the sensor up. Always fatal for the current run.
#[derive(Error, Debug)]
pub enum InitError {
    #[error("INA219 not found at expected address 0x{expected:02X}, found {found:02X?}")]
    UnexpectedTopology { expected: u8, found: Vec<u8> },

    #[error("Bus fault during initialization: {0}")]
    Bus(HardwareError),
}

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Sensor initialization failed: {0}")]
    Init(#[from] InitError),

    #[error("Hardware read failed: {0}")]
    Read(#[from] HardwareError),

    #[error("Failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("At least one telemetry field must be enabled")]
    EmptyFieldSet,

    #[error("Unknown telemetry field: {0}")]
    UnknownField(String),

    #[error("Sampling window of {0} ms is longer than the tick counter can measure")]
    WindowTooLong(u32),
}

pub type Result<T> = std::result::Result<T, TelemetryError>;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
