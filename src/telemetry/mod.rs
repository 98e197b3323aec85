pub mod clock;
pub mod data;

use std::convert::Infallible;
use std::io::Write;

use embedded_hal::i2c::I2c;
use tracing::{debug, info};

use crate::config::TelemetryConfig;
use crate::devices::adc::{AnalogInput, panel_voltage_from_raw};
use crate::devices::ina219::{Calibration, Ina219, current_from_shunt_mv};
use crate::devices::led::{Rgb, StatusIndicator};
use crate::error::{InitError, Result, TelemetryError};
use clock::{Clock, MAX_WINDOW_MS, ticks_add, ticks_diff};
pub use data::{CurrentStats, Field, FieldSet, Sample};
use data::StatsAccumulator;

/// The telemetry loop and the sampling routines built on the same hardware.
///
/// Owns the sensor handle for its whole life. Reports go to whatever line
/// sink the caller passes in; diagnostics go to the log.
pub struct Telemetry<I, A, L, C> {
    sensor: Ina219<I>,
    adc: A,
    led: L,
    clock: C,
    config: TelemetryConfig,
}

impl<I, A, L, C> Telemetry<I, A, L, C>
where
    I: I2c,
    A: AnalogInput,
    L: StatusIndicator,
    C: Clock,
{
    /// Wire up the peripherals without touching the bus.
    pub fn new(i2c: I, adc: A, led: L, clock: C, config: TelemetryConfig) -> Self {
        let sensor = Ina219::new(i2c, config.sensor_address);
        Telemetry {
            sensor,
            adc,
            led,
            clock,
            config,
        }
    }

    /// [`Telemetry::new`] followed by [`Telemetry::init`].
    pub fn start(
        i2c: I,
        adc: A,
        led: L,
        clock: C,
        config: TelemetryConfig,
    ) -> std::result::Result<Self, InitError> {
        let mut telemetry = Self::new(i2c, adc, led, clock, config);
        telemetry.init()?;
        Ok(telemetry)
    }

    /// Scan the bus, insist on exactly the expected sensor, then calibrate it.
    pub fn init(&mut self) -> std::result::Result<(), InitError> {
        info!("Starting init.");
        self.sensor.probe()?;
        self.sensor
            .calibrate(Calibration::RANGE_32V_2A)
            .map_err(InitError::Bus)?;
        info!("Init complete.");
        Ok(())
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Panel voltage in volts, reconstructed through the divider.
    pub fn read_adc_voltage(&mut self) -> Result<f64> {
        let raw = self.adc.read_u16()?;
        Ok(panel_voltage_from_raw(raw))
    }

    /// Read the enabled fields from live hardware.
    pub fn sample(&mut self, fields: FieldSet, timestamp_ms: Option<u32>) -> Result<Sample> {
        let mut sample = Sample {
            timestamp_ms,
            ..Default::default()
        };

        if fields.contains(Field::CurrentMa) || fields.contains(Field::ShuntVoltageMv) {
            let shunt_mv = self.sensor.shunt_voltage_mv()?;
            if fields.contains(Field::CurrentMa) {
                sample.current_ma = Some(current_from_shunt_mv(shunt_mv));
            }
            if fields.contains(Field::ShuntVoltageMv) {
                sample.shunt_voltage_mv = Some(shunt_mv);
            }
        }
        if fields.contains(Field::BusVoltageMv) {
            sample.bus_voltage_mv = Some(self.sensor.bus_voltage_mv()?);
        }
        if fields.contains(Field::AdcVoltageMv) {
            sample.adc_voltage = Some(self.read_adc_voltage()?);
        }
        Ok(sample)
    }

    /// Emit one report with the configured field set.
    pub fn log_json<W: Write>(&mut self, out: &mut W, timestamp_ms: Option<u32>) -> Result<Sample> {
        let fields = self.config.fields;
        self.log_json_fields(out, timestamp_ms, fields)
    }

    pub fn log_json_fields<W: Write>(
        &mut self,
        out: &mut W,
        timestamp_ms: Option<u32>,
        fields: FieldSet,
    ) -> Result<Sample> {
        let sample = self.sample(fields, timestamp_ms)?;
        let line = serde_json::to_string(&sample)?;
        writeln!(out, "{}", line)?;
        out.flush()?;
        debug!("Reported {}", line);
        Ok(sample)
    }

    /// Report timestamped samples every `period_ms` until `duration_ms` has
    /// elapsed. Targets are measured from the fixed start so sleep overshoot
    /// does not accumulate. Returns the number of reports emitted.
    pub fn sleep_ms_and_log_json<W: Write>(
        &mut self,
        out: &mut W,
        duration_ms: u32,
        period_ms: u32,
    ) -> Result<u32> {
        check_window(duration_ms)?;
        info!(
            "Timed sampling for {} ms every {} ms",
            duration_ms, period_ms
        );
        let start = self.clock.ticks_ms();
        let end = ticks_add(start, duration_ms as i32);
        let mut emitted = 0;

        loop {
            let now = self.clock.ticks_ms();
            if ticks_diff(end, now) <= 0 {
                break;
            }
            let elapsed = ticks_diff(now, start).max(0);

            self.log_json(out, Some(elapsed as u32))?;
            emitted += 1;

            // i64: a period near u32::MAX must not wrap into the past.
            let target = (elapsed as i64 + period_ms as i64).min(duration_ms as i64);
            let nap = target - ticks_diff(self.clock.ticks_ms(), start) as i64;
            if nap > 0 {
                self.clock.sleep_ms(nap as u32);
            }
        }

        info!("Timed sampling done, {} reports", emitted);
        Ok(emitted)
    }

    /// Sample current back to back for `duration_ms` and summarize it.
    /// At least one sample is always taken.
    pub fn sleep_ms_and_get_stats(&mut self, duration_ms: u32) -> Result<CurrentStats> {
        check_window(duration_ms)?;
        let start = self.clock.ticks_ms();
        let mut acc = StatsAccumulator::new(self.sensor.current_ma()?);

        while (ticks_diff(self.clock.ticks_ms(), start) as i64) < duration_ms as i64 {
            acc.push(self.sensor.current_ma()?);
        }

        let stats = acc.finish();
        info!(
            "Current over {} ms: min={} max={} avg={} n={}",
            duration_ms, stats.min, stats.max, stats.avg, stats.len
        );
        Ok(stats)
    }

    /// Color shown during the flash for a given bus voltage.
    pub fn indicator_color(&self, bus_voltage_mv: f64) -> Rgb {
        if bus_voltage_mv / 1000.0 < self.config.low_voltage_v {
            Rgb::WARNING
        } else {
            Rgb::NOMINAL
        }
    }

    /// One period: report, flash the status color, go dark for the rest.
    pub fn cycle<W: Write>(&mut self, out: &mut W) -> Result<()> {
        let sample = self.log_json(out, None)?;
        let bus_mv = match sample.bus_voltage_mv {
            Some(mv) => mv,
            None => self.sensor.bus_voltage_mv()?,
        };

        let color = self.indicator_color(bus_mv);
        self.led.set_color(color)?;
        self.clock.sleep_ms(self.config.flash_ms);
        self.led.set_color(Rgb::OFF)?;
        self.clock
            .sleep_ms(self.config.period_ms.saturating_sub(self.config.flash_ms));
        Ok(())
    }

    /// Report forever. Only returns when something fails.
    pub fn run<W: Write>(&mut self, out: &mut W) -> Result<Infallible> {
        info!(
            "Reporting {} every {} ms",
            self.config.fields, self.config.period_ms
        );
        loop {
            self.cycle(out)?;
        }
    }
}

fn check_window(duration_ms: u32) -> Result<()> {
    if duration_ms > MAX_WINDOW_MS {
        return Err(TelemetryError::WindowTooLong(duration_ms));
    }
    Ok(())
}
