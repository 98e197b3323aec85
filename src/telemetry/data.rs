use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::TelemetryError;

/// One reading, built and serialized within a single report.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct Sample {
    #[serde(rename = "current_mA", skip_serializing_if = "Option::is_none")]
    pub current_ma: Option<f64>,
    #[serde(rename = "bus_voltage_mV", skip_serializing_if = "Option::is_none")]
    pub bus_voltage_mv: Option<f64>,
    #[serde(rename = "shunt_voltage_mV", skip_serializing_if = "Option::is_none")]
    pub shunt_voltage_mv: Option<f64>,
    // Volts, the key name is kept for compatibility with existing host scripts.
    #[serde(rename = "adc_voltage_mV", skip_serializing_if = "Option::is_none")]
    pub adc_voltage: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_ms: Option<u32>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    #[serde(rename = "current_mA")]
    CurrentMa,
    #[serde(rename = "bus_voltage_mV")]
    BusVoltageMv,
    #[serde(rename = "shunt_voltage_mV")]
    ShuntVoltageMv,
    #[serde(rename = "adc_voltage_mV")]
    AdcVoltageMv,
}

impl Field {
    pub const ALL: [Field; 4] = [
        Field::CurrentMa,
        Field::BusVoltageMv,
        Field::ShuntVoltageMv,
        Field::AdcVoltageMv,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Field::CurrentMa => "current_mA",
            Field::BusVoltageMv => "bus_voltage_mV",
            Field::ShuntVoltageMv => "shunt_voltage_mV",
            Field::AdcVoltageMv => "adc_voltage_mV",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Field::CurrentMa => 0b0001,
            Field::BusVoltageMv => 0b0010,
            Field::ShuntVoltageMv => 0b0100,
            Field::AdcVoltageMv => 0b1000,
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Field {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Field::ALL
            .into_iter()
            .find(|field| field.key() == s)
            .ok_or_else(|| TelemetryError::UnknownField(s.to_string()))
    }
}

/// Non-empty set of fields a report carries.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "Vec<Field>")]
pub struct FieldSet(u8);

impl FieldSet {
    pub fn new(fields: &[Field]) -> Result<Self, TelemetryError> {
        let bits = fields.iter().fold(0, |acc, field| acc | field.bit());
        if bits == 0 {
            return Err(TelemetryError::EmptyFieldSet);
        }
        Ok(FieldSet(bits))
    }

    pub fn contains(self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    pub fn fields(self) -> impl Iterator<Item = Field> {
        Field::ALL.into_iter().filter(move |field| self.contains(*field))
    }

    /// Parses a comma-separated list of wire keys, e.g. `current_mA,bus_voltage_mV`.
    pub fn parse_list(list: &str) -> Result<Self, TelemetryError> {
        let fields = list
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Field::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(&fields)
    }
}

impl TryFrom<Vec<Field>> for FieldSet {
    type Error = TelemetryError;

    fn try_from(fields: Vec<Field>) -> Result<Self, Self::Error> {
        Self::new(&fields)
    }
}

impl Default for FieldSet {
    fn default() -> Self {
        FieldSet(Field::CurrentMa.bit() | Field::BusVoltageMv.bit() | Field::AdcVoltageMv.bit())
    }
}

impl fmt::Display for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.fields().map(Field::key).collect();
        f.write_str(&keys.join(","))
    }
}

/// Running current statistics; individual samples are never kept.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct CurrentStats {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
    pub len: u64,
}

/// Seeded with the first value so there is always something to summarize.
#[derive(Debug)]
pub(crate) struct StatsAccumulator {
    min: f64,
    max: f64,
    sum: f64,
    count: u64,
}

impl StatsAccumulator {
    pub(crate) fn new(first: f64) -> Self {
        StatsAccumulator {
            min: first,
            max: first,
            sum: first,
            count: 1,
        }
    }

    pub(crate) fn push(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.sum += value;
        self.count += 1;
    }

    pub(crate) fn finish(&self) -> CurrentStats {
        CurrentStats {
            min: self.min,
            max: self.max,
            avg: self.sum / self.count as f64,
            len: self.count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_set_matches_reporting_defaults() {
        let keys: Vec<Field> = FieldSet::default().fields().collect();
        assert_eq!(
            keys,
            vec![Field::CurrentMa, Field::BusVoltageMv, Field::AdcVoltageMv]
        );
    }

    #[test]
    fn empty_set_is_rejected() {
        assert!(matches!(FieldSet::new(&[]), Err(TelemetryError::EmptyFieldSet)));
        assert!(matches!(
            FieldSet::parse_list(" , "),
            Err(TelemetryError::EmptyFieldSet)
        ));
    }

    #[test]
    fn parse_list_accepts_wire_keys() {
        let set = FieldSet::parse_list("shunt_voltage_mV, current_mA").unwrap();
        assert!(set.contains(Field::CurrentMa));
        assert!(set.contains(Field::ShuntVoltageMv));
        assert!(!set.contains(Field::BusVoltageMv));
        assert_eq!(set.to_string(), "current_mA,shunt_voltage_mV");
    }

    #[test]
    fn parse_list_rejects_unknown_keys() {
        match FieldSet::parse_list("current_mA,power_mW") {
            Err(TelemetryError::UnknownField(name)) => assert_eq!(name, "power_mW"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn sample_serializes_in_wire_order_and_skips_absent() {
        let sample = Sample {
            current_ma: Some(12.5),
            adc_voltage: Some(3.0),
            timestamp_ms: Some(250),
            ..Default::default()
        };
        let json = serde_json::to_string(&sample).unwrap();
        assert_eq!(
            json,
            r#"{"current_mA":12.5,"adc_voltage_mV":3.0,"timestamp_ms":250}"#
        );
    }

    #[test]
    fn accumulator_tracks_extremes_and_mean() {
        let mut acc = StatsAccumulator::new(4.0);
        assert_eq!(acc.finish().len, 1);
        for v in [-2.0, 10.0] {
            acc.push(v);
        }
        let stats = acc.finish();
        assert_eq!(stats.min, -2.0);
        assert_eq!(stats.max, 10.0);
        assert_eq!(stats.avg, 4.0);
        assert_eq!(stats.len, 3);
    }
}
