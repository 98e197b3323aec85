use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::devices::ina219::DEFAULT_ADDRESS;
use crate::error::ConfigError;
use crate::telemetry::FieldSet;

/// Configuration for the telemetry program
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TelemetryConfig {
    pub sensor_address: u8,      // Expected INA219 address, the only device allowed on the bus
    pub period_ms: u32,          // Nominal reporting period
    pub flash_ms: u32,           // Time the status LED stays lit each period
    pub low_voltage_v: f64,      // Bus voltage below this shows the warning color
    pub log_period_ms: u32,      // Default period for timed sampling from the prompt
    pub fields: FieldSet,        // Keys carried by each report
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            sensor_address: DEFAULT_ADDRESS,
            period_ms: 500,
            flash_ms: 50,
            low_voltage_v: 0.5,
            log_period_ms: 250,
            fields: FieldSet::default(),
        }
    }
}

impl TelemetryConfig {
    /// Load a JSON config file. Keys left out keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading telemetry configuration from {}", path.display());
        let text = fs::read_to_string(path)?;
        let config: TelemetryConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period_ms == 0 {
            return Err(ConfigError::Invalid("period_ms must be positive".into()));
        }
        if self.flash_ms > self.period_ms {
            return Err(ConfigError::Invalid(format!(
                "flash_ms ({}) exceeds period_ms ({})",
                self.flash_ms, self.period_ms
            )));
        }
        if self.log_period_ms == 0 {
            return Err(ConfigError::Invalid("log_period_ms must be positive".into()));
        }
        if !(0x08..=0x77).contains(&self.sensor_address) {
            return Err(ConfigError::Invalid(format!(
                "sensor_address 0x{:02X} is outside the scanned range",
                self.sensor_address
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::Field;
    use std::io::Write;

    #[test]
    fn defaults_match_rig() {
        let config = TelemetryConfig::default();
        assert_eq!(config.sensor_address, 0x40);
        assert_eq!(config.period_ms, 500);
        assert_eq!(config.flash_ms, 50);
        assert_eq!(config.low_voltage_v, 0.5);
        config.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"period_ms": 1000, "fields": ["shunt_voltage_mV"]}}"#).unwrap();

        let config = TelemetryConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.period_ms, 1000);
        assert_eq!(config.flash_ms, 50);
        assert!(config.fields.contains(Field::ShuntVoltageMv));
        assert!(!config.fields.contains(Field::CurrentMa));
    }

    #[test]
    fn empty_field_list_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"fields": []}}"#).unwrap();
        assert!(matches!(
            TelemetryConfig::from_json_file(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn flash_longer_than_period_is_invalid() {
        let config = TelemetryConfig {
            period_ms: 40,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
