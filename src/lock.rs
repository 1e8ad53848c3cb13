//! Per-lock timing state. A [`LockTimer`] owns the watcher on its sensor pin
//! for the duration of a run and reports the outcome to the board loop as a
//! [`LockEvent`].

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::config::LockConfig;
use crate::gpio::{GpioError, Level, PinDriver, PinId};
use crate::watcher::{self, Debounce, WatcherHandle};

/// Outcome of one lock monitor, delivered to the board loop. `run_seq` tags
/// the run the event belongs to; the board drops events from stale runs.
#[derive(Debug)]
pub struct LockEvent {
    pub index: usize,
    pub run_seq: u64,
    pub outcome: Result<Duration, GpioError>,
}

#[derive(Debug)]
pub struct LockTimer {
    name: String,
    pin: PinId,
    solved_level: Level,
    debounce_window: Duration,
    pick_duration: Option<Duration>,
    fault: Option<String>,
    watcher: Option<WatcherHandle>,
    relay: Option<JoinHandle<()>>,
}

impl LockTimer {
    pub fn new(config: &LockConfig, debounce_window: Duration) -> Self {
        Self {
            name: config.name.clone(),
            pin: config.pin,
            solved_level: config.solved_state,
            debounce_window,
            pick_duration: None,
            fault: None,
            watcher: None,
            relay: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pick_duration(&self) -> Option<Duration> {
        self.pick_duration
    }

    pub fn fault(&self) -> Option<&str> {
        self.fault.as_deref()
    }

    /// Begin monitoring for this run. Must not be called again before
    /// [`LockTimer::stop`] or a recorded outcome.
    pub fn start(
        &mut self,
        driver: Arc<dyn PinDriver>,
        started_at: Instant,
        index: usize,
        run_seq: u64,
        events: mpsc::Sender<LockEvent>,
    ) {
        debug_assert!(self.watcher.is_none(), "lock timer started while running");

        let (handle, triggered) = watcher::spawn(
            driver,
            self.pin,
            self.solved_level,
            Some(Debounce::new(self.debounce_window)),
        );

        let relay = tokio::spawn(async move {
            let outcome = match triggered.await {
                Ok(Ok(trigger)) => Ok(trigger.at.duration_since(started_at)),
                Ok(Err(e)) => Err(e),
                // Watcher cancelled; nothing to report.
                Err(_) => return,
            };
            let _ = events.send(LockEvent { index, run_seq, outcome }).await;
        });

        self.watcher = Some(handle);
        self.relay = Some(relay);
    }

    /// Cancel the watcher if it has not triggered yet. Safe to call on an
    /// already-stopped timer.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.watcher.take() {
            handle.cancel().await;
        }
        if let Some(relay) = self.relay.take() {
            relay.abort();
            let _ = relay.await;
        }
    }

    /// Record the solve time for this run. The watcher has already exited.
    pub fn record_solved(&mut self, duration: Duration) {
        self.pick_duration = Some(duration);
        self.watcher = None;
        self.relay = None;
    }

    /// Record a fatal pin fault. The watcher has already exited.
    pub fn record_fault(&mut self, error: &GpioError) {
        self.fault = Some(error.to_string());
        self.watcher = None;
        self.relay = None;
    }

    /// Return the lock to its pristine "unset" state for the next run.
    pub fn reset(&mut self) {
        self.pick_duration = None;
        self.fault = None;
    }
}
