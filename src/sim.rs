//! In-memory pin driver used by the binary and the tests. Input levels are
//! driven with [`SimulatedGpio::set_level`]; reading a pin that was never
//! wired fails the same way a broken sensor line would.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::gpio::{GpioError, Level, PinDriver, PinId};

#[derive(Debug, Default)]
pub struct SimulatedGpio {
    pins: Mutex<HashMap<PinId, Level>>,
    failing: Mutex<HashSet<PinId>>,
}

impl SimulatedGpio {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive a pin to a level, as the physical world would.
    pub fn set_level(&self, pin: PinId, level: Level) {
        self.pins.lock().unwrap().insert(pin, level);
    }

    pub fn level(&self, pin: PinId) -> Option<Level> {
        self.pins.lock().unwrap().get(&pin).copied()
    }

    /// Make every subsequent read of `pin` fail, simulating a broken line.
    pub fn fail_reads(&self, pin: PinId) {
        self.failing.lock().unwrap().insert(pin);
    }
}

#[async_trait]
impl PinDriver for SimulatedGpio {
    async fn read_level(&self, pin: PinId) -> Result<Level, GpioError> {
        if self.failing.lock().unwrap().contains(&pin) {
            return Err(GpioError::Read {
                pin,
                reason: "simulated read fault".to_string(),
            });
        }
        self.pins
            .lock()
            .unwrap()
            .get(&pin)
            .copied()
            .ok_or(GpioError::Read {
                pin,
                reason: "pin not wired".to_string(),
            })
    }

    async fn write_level(&self, pin: PinId, level: Level) -> Result<(), GpioError> {
        self.pins.lock().unwrap().insert(pin, level);
        Ok(())
    }
}
