use crate::error::HardwareError;

/// Reference voltage over full-scale code of the 16-bit reading.
pub const ADC_CONVERSION_FACTOR: f64 = 3.3 / 65535.0;

/// Panel-side divider: 4k7 bottom, 18k top. Recompute if the resistors change.
pub const DIVIDER_BOTTOM_KOHMS: f64 = 4.7;
pub const DIVIDER_TOP_KOHMS: f64 = 18.0;
pub const DIVIDER_RATIO: f64 = DIVIDER_BOTTOM_KOHMS / (DIVIDER_BOTTOM_KOHMS + DIVIDER_TOP_KOHMS);

/// A single analog channel sampled as a left-justified 16-bit code.
pub trait AnalogInput {
    fn read_u16(&mut self) -> Result<u16, HardwareError>;
}

/// Panel voltage in volts, undoing the divider in front of the ADC pin.
pub fn panel_voltage_from_raw(raw: u16) -> f64 {
    raw as f64 * ADC_CONVERSION_FACTOR / DIVIDER_RATIO
}
