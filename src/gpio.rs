//! Pin driver seam. The board never touches hardware directly; it reads and
//! writes digital levels through [`PinDriver`], so the real GPIO backend (or
//! the simulator) plugs in at process start.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// BCM pin number.
pub type PinId = u8;

/// Digital level of a pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn toggled(self) -> Self {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum GpioError {
    #[error("read failed on pin {pin}: {reason}")]
    Read { pin: PinId, reason: String },
    #[error("write failed on pin {pin}: {reason}")]
    Write { pin: PinId, reason: String },
}

/// Digital pin access. Read failures are surfaced as-is; persistent
/// electrical faults are not recoverable at this layer, so there is no retry
/// behind this trait.
#[async_trait]
pub trait PinDriver: Send + Sync {
    async fn read_level(&self, pin: PinId) -> Result<Level, GpioError>;
    async fn write_level(&self, pin: PinId, level: Level) -> Result<(), GpioError>;
}
