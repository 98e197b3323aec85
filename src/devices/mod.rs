pub mod adc;
pub mod ina219;
pub mod led;
pub mod sim;

pub use adc::{AnalogInput, panel_voltage_from_raw};
pub use ina219::{Calibration, Ina219};
pub use led::{LogIndicator, Rgb, StatusIndicator};
pub use sim::{PanelHandle, SimAdc, SimI2c, SimIna219};
