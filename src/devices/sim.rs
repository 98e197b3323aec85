//! Simulated bench peripherals.
//!
//! Lets the telemetry program run on a desktop and gives the tests a rig with
//! known readings. Handles share state with the peripheral they came from, so
//! readings can change while the loop owns the peripheral.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use embedded_hal::i2c::{self, ErrorKind, I2c, NoAcknowledgeSource, Operation, SevenBitAddress};

use super::adc::AnalogInput;
use super::ina219::{REG_BUS_VOLTAGE, REG_CALIBRATION, REG_SHUNT_VOLTAGE, SHUNT_OHMS};
use crate::error::HardwareError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimBusError(pub ErrorKind);

impl fmt::Display for SimBusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "simulated bus error: {}", self.0)
    }
}

impl std::error::Error for SimBusError {}

impl i2c::Error for SimBusError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

#[derive(Debug, Default)]
struct Ina219State {
    registers: [u16; (REG_CALIBRATION + 1) as usize],
    fault: bool,
}

/// Register-level model of an INA219.
#[derive(Debug)]
pub struct SimIna219 {
    state: Arc<Mutex<Ina219State>>,
    pointer: u8,
}

impl SimIna219 {
    pub fn new() -> Self {
        SimIna219 {
            state: Arc::new(Mutex::new(Ina219State::default())),
            pointer: 0,
        }
    }

    pub fn handle(&self) -> PanelHandle {
        PanelHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Ina219State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn faulted(&self) -> bool {
        self.lock().fault
    }

    fn write(&mut self, bytes: &[u8]) -> Result<(), SimBusError> {
        let Some((&register, value)) = bytes.split_first() else {
            return Ok(());
        };
        if register > REG_CALIBRATION {
            return Err(SimBusError(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Data)));
        }
        self.pointer = register;
        if let [hi, lo, ..] = value {
            self.lock().registers[register as usize] = u16::from_be_bytes([*hi, *lo]);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) {
        let bytes = self.lock().registers[self.pointer as usize].to_be_bytes();
        for (slot, byte) in buf.iter_mut().zip(bytes.iter().cycle()) {
            *slot = *byte;
        }
    }
}

impl Default for SimIna219 {
    fn default() -> Self {
        Self::new()
    }
}

/// Drives the readings of a [`SimIna219`] from outside the bus.
#[derive(Debug, Clone)]
pub struct PanelHandle {
    state: Arc<Mutex<Ina219State>>,
}

impl PanelHandle {
    fn lock(&self) -> MutexGuard<'_, Ina219State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_register(&self, register: u8, value: u16) {
        self.lock().registers[register as usize] = value;
    }

    pub fn register(&self, register: u8) -> u16 {
        self.lock().registers[register as usize]
    }

    /// Encode a bus voltage and load current the way the sensor would.
    pub fn set_reading(&self, bus_mv: f64, current_ma: f64) {
        let shunt_mv = current_ma * SHUNT_OHMS;
        let shunt_raw = (shunt_mv / 0.01).round().clamp(i16::MIN as f64, i16::MAX as f64) as i16;
        let bus_raw = ((bus_mv / 4.0).round().clamp(0.0, 8191.0) as u16) << 3;
        let mut state = self.lock();
        state.registers[REG_SHUNT_VOLTAGE as usize] = shunt_raw as u16;
        state.registers[REG_BUS_VOLTAGE as usize] = bus_raw;
    }

    /// While set, every transaction on the bus fails with a bus error.
    pub fn set_fault(&self, fault: bool) {
        self.lock().fault = fault;
    }
}

/// I2C bus with simulated INA219s attached.
#[derive(Debug, Default)]
pub struct SimI2c {
    devices: BTreeMap<u8, SimIna219>,
}

impl SimI2c {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, address: u8, device: SimIna219) -> Self {
        self.devices.insert(address, device);
        self
    }
}

impl i2c::ErrorType for SimI2c {
    type Error = SimBusError;
}

impl I2c<SevenBitAddress> for SimI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if self.devices.values().any(SimIna219::faulted) {
            return Err(SimBusError(ErrorKind::Bus));
        }
        let device = self
            .devices
            .get_mut(&address)
            .ok_or(SimBusError(ErrorKind::NoAcknowledge(NoAcknowledgeSource::Address)))?;
        for operation in operations {
            match operation {
                Operation::Write(bytes) => device.write(bytes)?,
                Operation::Read(buf) => device.read(buf),
            }
        }
        Ok(())
    }
}

/// ADC channel returning whatever raw code was last set on it.
#[derive(Debug, Clone, Default)]
pub struct SimAdc {
    raw: Arc<AtomicU16>,
    fault: Arc<AtomicBool>,
}

impl SimAdc {
    pub fn new(raw: u16) -> Self {
        let adc = Self::default();
        adc.set_raw(raw);
        adc
    }

    pub fn set_raw(&self, raw: u16) {
        self.raw.store(raw, Ordering::Relaxed);
    }

    pub fn set_fault(&self, fault: bool) {
        self.fault.store(fault, Ordering::Relaxed);
    }
}

impl AnalogInput for SimAdc {
    fn read_u16(&mut self) -> Result<u16, HardwareError> {
        if self.fault.load(Ordering::Relaxed) {
            return Err(HardwareError::Adc("simulated conversion fault".into()));
        }
        Ok(self.raw.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_address_is_not_acknowledged() {
        let mut bus = SimI2c::new();
        let err = bus.write(0x40, &[]).unwrap_err();
        assert!(matches!(err.0, ErrorKind::NoAcknowledge(_)));
    }

    #[test]
    fn register_pointer_then_read() {
        let sensor = SimIna219::new();
        let panel = sensor.handle();
        let mut bus = SimI2c::new().with_device(0x40, sensor);
        panel.set_register(REG_BUS_VOLTAGE, 0xABCD);

        let mut buf = [0u8; 2];
        bus.write_read(0x40, &[REG_BUS_VOLTAGE], &mut buf).unwrap();
        assert_eq!(buf, [0xAB, 0xCD]);
    }

    #[test]
    fn set_reading_encodes_sensor_units() {
        let panel = SimIna219::new().handle();
        panel.set_reading(12_000.0, 150.0);
        assert_eq!(panel.register(REG_SHUNT_VOLTAGE), 1500);
        assert_eq!(panel.register(REG_BUS_VOLTAGE), 3000 << 3);

        panel.set_reading(0.0, -10.0);
        assert_eq!(panel.register(REG_SHUNT_VOLTAGE) as i16, -100);
    }

    #[test]
    fn adc_fault_is_reported() {
        let mut adc = SimAdc::new(1234);
        assert_eq!(adc.read_u16().unwrap(), 1234);
        adc.set_fault(true);
        assert!(adc.read_u16().is_err());
    }
}
