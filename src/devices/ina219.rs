use embedded_hal::i2c::{Error as _, ErrorKind, I2c};
use tracing::{debug, info};

use crate::error::{HardwareError, InitError};

pub const DEFAULT_ADDRESS: u8 = 0x40;

/// Shunt fitted on the rig: R100.
pub const SHUNT_OHMS: f64 = 0.100;

pub const REG_CONFIG: u8 = 0x00;
pub const REG_SHUNT_VOLTAGE: u8 = 0x01;
pub const REG_BUS_VOLTAGE: u8 = 0x02;
pub const REG_CALIBRATION: u8 = 0x05;

const CONFIG_BVOLTAGERANGE_32V: u16 = 0x2000;
const CONFIG_GAIN_8_320MV: u16 = 0x1800;
const CONFIG_BADCRES_12BIT: u16 = 0x0180;
const CONFIG_SADCRES_12BIT_1S_532US: u16 = 0x0018;
const CONFIG_MODE_SANDBVOLT_CONTINUOUS: u16 = 0x0007;

/// Register values for one full-scale range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub calibration: u16,
    pub config: u16,
}

impl Calibration {
    /// 32 V bus, 2 A through a 0.1 ohm shunt, 100 uA current LSB.
    pub const RANGE_32V_2A: Calibration = Calibration {
        calibration: 4096,
        config: CONFIG_BVOLTAGERANGE_32V
            | CONFIG_GAIN_8_320MV
            | CONFIG_BADCRES_12BIT
            | CONFIG_SADCRES_12BIT_1S_532US
            | CONFIG_MODE_SANDBVOLT_CONTINUOUS,
    };
}

/// Probe every non-reserved 7-bit address with an empty write.
///
/// A missing acknowledge means nothing is there; any other bus error aborts
/// the scan.
pub fn scan<I: I2c>(i2c: &mut I) -> Result<Vec<u8>, HardwareError> {
    let mut found = Vec::new();
    for address in 0x08..=0x77u8 {
        match i2c.write(address, &[]) {
            Ok(()) => found.push(address),
            Err(e) if matches!(e.kind(), ErrorKind::NoAcknowledge(_)) => {}
            Err(e) => return Err(HardwareError::from_i2c(e)),
        }
    }
    Ok(found)
}

pub struct Ina219<I> {
    i2c: I,
    address: u8,
}

impl<I: I2c> Ina219<I> {
    pub fn new(i2c: I, address: u8) -> Self {
        info!("Initializing INA219 at address 0x{:02X}", address);
        Ina219 { i2c, address }
    }

    /// Scan the bus and insist that this sensor is the only device on it.
    pub fn probe(&mut self) -> Result<(), InitError> {
        info!("Scanning I2C bus for INA219.");
        let found = scan(&mut self.i2c).map_err(InitError::Bus)?;
        info!("Found {} devices: {:02X?}", found.len(), found);

        if found != [self.address] {
            return Err(InitError::UnexpectedTopology {
                expected: self.address,
                found,
            });
        }
        Ok(())
    }

    pub fn calibrate(&mut self, calibration: Calibration) -> Result<(), HardwareError> {
        info!(
            "Calibrating INA219: calibration={} config=0x{:04X}",
            calibration.calibration, calibration.config
        );
        self.write_register(REG_CALIBRATION, calibration.calibration)?;
        self.write_register(REG_CONFIG, calibration.config)
    }

    /// Shunt voltage in millivolts (10 uV per LSB, signed).
    pub fn shunt_voltage_mv(&mut self) -> Result<f64, HardwareError> {
        let raw = self.read_register(REG_SHUNT_VOLTAGE)? as i16;
        Ok(raw as f64 * 0.01)
    }

    /// Bus voltage in millivolts (bits 15..3, 4 mV per LSB).
    pub fn bus_voltage_mv(&mut self) -> Result<f64, HardwareError> {
        let raw = self.read_register(REG_BUS_VOLTAGE)?;
        Ok(((raw >> 3) as u32 * 4) as f64)
    }

    /// Current derived from the shunt drop, not the sensor's current register.
    pub fn current_ma(&mut self) -> Result<f64, HardwareError> {
        Ok(current_from_shunt_mv(self.shunt_voltage_mv()?))
    }

    pub fn read_register(&mut self, register: u8) -> Result<u16, HardwareError> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(self.address, &[register], &mut buf)
            .map_err(HardwareError::from_i2c)?;
        let value = u16::from_be_bytes(buf);
        debug!("INA219 reg 0x{:02X} -> 0x{:04X}", register, value);
        Ok(value)
    }

    pub fn write_register(&mut self, register: u8, value: u16) -> Result<(), HardwareError> {
        let [hi, lo] = value.to_be_bytes();
        debug!("INA219 reg 0x{:02X} <- 0x{:04X}", register, value);
        self.i2c
            .write(self.address, &[register, hi, lo])
            .map_err(HardwareError::from_i2c)
    }
}

/// Ohm's law across the fixed shunt.
pub fn current_from_shunt_mv(shunt_mv: f64) -> f64 {
    shunt_mv / SHUNT_OHMS
}
