//! simulated time
//!
//! A clock counts the cycles charged by completed accesses and converts
//! them to virtual time at a fixed frequency.

use std::time::Duration;

use crate::Error;

pub type Cycles = u64;

pub const DEFAULT_FREQUENCY: u64 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct Clock {
    frequency: u64,
    elapsed: Cycles,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            frequency: DEFAULT_FREQUENCY,
            elapsed: 0,
        }
    }

    /// a clock ticking `frequency` times per virtual second
    pub fn with_frequency(frequency: u64) -> Result<Self, Error> {
        if frequency == 0 {
            return Err(Error::ZeroFrequency);
        }
        Ok(Self {
            frequency,
            elapsed: 0,
        })
    }

    pub fn frequency(&self) -> u64 {
        self.frequency
    }

    pub fn cycles(&self) -> Cycles {
        self.elapsed
    }

    pub fn charge(&mut self, cycles: Cycles) {
        self.elapsed = self.elapsed.saturating_add(cycles);
    }

    /// elapsed virtual time
    pub fn elapsed(&self) -> Duration {
        let secs = self.elapsed / self.frequency;
        let rem = self.elapsed % self.frequency;
        let nanos = (rem as u128 * 1_000_000_000 / self.frequency as u128) as u32;
        Duration::new(secs, nanos)
    }

    /// resets the cycle count, returning what had elapsed
    pub fn reset(&mut self) -> Cycles {
        std::mem::take(&mut self.elapsed)
    }
}
