#[cfg(test)]
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::HardwareError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const OFF: Rgb = Rgb::new(0, 0, 0);
    /// Bus voltage under threshold.
    pub const WARNING: Rgb = Rgb::new(255, 0, 0);
    pub const NOMINAL: Rgb = Rgb::new(0, 0, 255);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Rgb { r, g, b }
    }
}

/// Single-pixel tri-color status LED.
pub trait StatusIndicator {
    fn set_color(&mut self, color: Rgb) -> Result<(), HardwareError>;
}

/// Indicator for hosts without an LED; color changes go to the log.
#[derive(Debug, Default)]
pub struct LogIndicator {
    current: Option<Rgb>,
}

impl StatusIndicator for LogIndicator {
    fn set_color(&mut self, color: Rgb) -> Result<(), HardwareError> {
        if self.current != Some(color) {
            debug!("Status LED -> ({}, {}, {})", color.r, color.g, color.b);
            self.current = Some(color);
        }
        Ok(())
    }
}

/// Keeps every color written, shareable with whoever inspects it.
#[cfg(test)]
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    history: Arc<Mutex<Vec<Rgb>>>,
}

#[cfg(test)]
impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<Rgb> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
impl StatusIndicator for RecordingIndicator {
    fn set_color(&mut self, color: Rgb) -> Result<(), HardwareError> {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(color);
        Ok(())
    }
}
