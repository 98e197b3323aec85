//! Millisecond tick counter used for all loop timing.
//!
//! The counter is a fixed-width `u32` that wraps. Differences and offsets must
//! go through [`ticks_diff`] and [`ticks_add`]; plain subtraction breaks at
//! the wrap point.

use std::thread;
use std::time::{Duration, Instant};

/// Longest span [`ticks_diff`] can measure.
pub const MAX_WINDOW_MS: u32 = i32::MAX as u32;

/// Signed distance from `start` to `end`, correct across one wrap.
pub fn ticks_diff(end: u32, start: u32) -> i32 {
    end.wrapping_sub(start) as i32
}

/// Tick value `delta` milliseconds after (or before) `ticks`.
pub fn ticks_add(ticks: u32, delta: i32) -> u32 {
    ticks.wrapping_add(delta as u32)
}

pub trait Clock {
    fn ticks_ms(&mut self) -> u32;
    fn sleep_ms(&mut self, ms: u32);
}

/// Wall clock backed by [`Instant`], truncated to the wrapping tick width.
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        SystemClock {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn ticks_ms(&mut self) -> u32 {
        self.epoch.elapsed().as_millis() as u32
    }

    fn sleep_ms(&mut self, ms: u32) {
        thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Clock that only moves when told to.
///
/// Sleeping advances it by the requested amount and every tick read advances
/// it by `step_per_read`, which lets busy-polling loops terminate in tests.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: u32,
    step_per_read: u32,
    sleeps: Vec<u32>,
}

#[cfg(test)]
impl ManualClock {
    pub fn starting_at(now: u32) -> Self {
        ManualClock {
            now,
            step_per_read: 0,
            sleeps: Vec::new(),
        }
    }

    pub fn with_step_per_read(mut self, step: u32) -> Self {
        self.step_per_read = step;
        self
    }

    pub fn now(&self) -> u32 {
        self.now
    }

    pub fn advance(&mut self, ms: u32) {
        self.now = self.now.wrapping_add(ms);
    }

    /// Every sleep requested so far, in order.
    pub fn sleeps(&self) -> &[u32] {
        &self.sleeps
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn ticks_ms(&mut self) -> u32 {
        let ticks = self.now;
        self.now = self.now.wrapping_add(self.step_per_read);
        ticks
    }

    fn sleep_ms(&mut self, ms: u32) {
        self.sleeps.push(ms);
        self.advance(ms);
    }
}
