//! speedpick: timing board for competitive lock picking.
//!
//! A supervisor task polls debounced digital inputs (a start button, a reset
//! button and one sensor pin per lock) and records how long each lock takes
//! to open after a run starts. The current state is exposed over a small
//! HTTP API.

pub mod board;
pub mod config;
pub mod gpio;
pub mod lock;
pub mod sim;
pub mod watcher;
pub mod web;

pub use board::{BoardHandle, BoardSnapshot};
pub use config::Config;
pub use gpio::{Level, PinDriver, PinId};
