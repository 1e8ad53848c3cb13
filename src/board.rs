//! Board supervisor. A single task owns all mutable board state (run flag,
//! lock timers, button watchers) and drives the Idle/Running state machine.
//! Everything outside the task talks to it through [`BoardRequest`] messages
//! with oneshot replies, so Start/Reset are atomic with respect to lock
//! triggers arriving concurrently.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

use crate::config::Config;
use crate::gpio::{GpioError, Level, PinDriver, PinId};
use crate::lock::{LockEvent, LockTimer};
use crate::watcher::{self, Debounce, Trigger, TriggerRx, WatcherHandle};

/// Debounce window for the start and reset buttons.
const BUTTON_DEBOUNCE_WINDOW: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("board task is no longer running")]
    Closed,
}

/// Requests handled by the board task.
#[derive(Debug)]
pub enum BoardRequest {
    /// Read the current aggregated state.
    Snapshot {
        respond_to: oneshot::Sender<BoardSnapshot>,
    },
    /// Begin a run. No-op while already running.
    Start {
        respond_to: oneshot::Sender<()>,
    },
    /// Stop any run in progress and clear all recorded times. Benign from
    /// Idle.
    Reset {
        respond_to: oneshot::Sender<()>,
    },
    /// Tear the board down: reset, cancel the button watchers, exit.
    Shutdown {
        respond_to: oneshot::Sender<()>,
    },
}

/// Serializable view of the board for the reporting layer.
#[derive(Debug, Clone, Serialize)]
pub struct BoardSnapshot {
    pub running: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub locks: Vec<LockSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LockSnapshot {
    pub name: String,
    pub pick_duration_ms: Option<u64>,
    pub fault: Option<String>,
}

/// Cloneable handle used by the web layer and tests to talk to the board
/// task.
#[derive(Debug, Clone)]
pub struct BoardHandle {
    requests: mpsc::Sender<BoardRequest>,
}

impl BoardHandle {
    pub async fn snapshot(&self) -> Result<BoardSnapshot, BoardError> {
        self.request(|respond_to| BoardRequest::Snapshot { respond_to })
            .await
    }

    pub async fn start(&self) -> Result<(), BoardError> {
        self.request(|respond_to| BoardRequest::Start { respond_to })
            .await
    }

    pub async fn reset(&self) -> Result<(), BoardError> {
        self.request(|respond_to| BoardRequest::Reset { respond_to })
            .await
    }

    pub async fn shutdown(&self) -> Result<(), BoardError> {
        self.request(|respond_to| BoardRequest::Shutdown { respond_to })
            .await
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> BoardRequest,
    ) -> Result<T, BoardError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| BoardError::Closed)?;
        rx.await.map_err(|_| BoardError::Closed)
    }
}

/// Spawn the board task. Returns the handle plus the task's join handle so
/// the caller can await full teardown.
pub fn spawn(config: &Config, driver: Arc<dyn PinDriver>) -> (BoardHandle, JoinHandle<()>) {
    let (requests_tx, requests_rx) = mpsc::channel(16);
    let board = Board::new(config, driver, requests_rx);
    let join = tokio::spawn(board.run());
    (BoardHandle { requests: requests_tx }, join)
}

/// One control button and its current watcher. The watcher is relaunched
/// after each firing, carrying the previous trigger instant so the debounce
/// window spans restarts.
struct Button {
    label: &'static str,
    pin: PinId,
    handle: WatcherHandle,
    triggered: TriggerRx,
    // Keeps a never-firing channel open once the button is parked on a read
    // fault.
    _parked: Option<oneshot::Sender<Result<Trigger, GpioError>>>,
}

impl Button {
    fn spawn(
        label: &'static str,
        pin: PinId,
        driver: Arc<dyn PinDriver>,
        last_trigger: Option<Instant>,
    ) -> Self {
        let debounce = Debounce {
            window: BUTTON_DEBOUNCE_WINDOW,
            last_trigger,
        };
        let (handle, triggered) = watcher::spawn(driver, pin, Level::High, Some(debounce));
        Self {
            label,
            pin,
            handle,
            triggered,
            _parked: None,
        }
    }

    /// Replace the spent watcher with a fresh one so the next press is seen.
    fn relaunch(&mut self, driver: Arc<dyn PinDriver>, last_trigger: Instant) {
        let fresh = Button::spawn(self.label, self.pin, driver, Some(last_trigger));
        let spent = std::mem::replace(self, fresh);
        // The spent watcher already exited after firing; dropping its handle
        // is enough.
        drop(spent);
    }

    /// Stop watching this button permanently. The pending receiver is swapped
    /// for one that never resolves so the supervisor loop can keep selecting
    /// on it.
    fn park(&mut self) {
        let (tx, rx) = oneshot::channel();
        self.triggered = rx;
        self._parked = Some(tx);
    }

    async fn cancel(self) {
        self.handle.cancel().await;
    }
}

struct Board {
    driver: Arc<dyn PinDriver>,
    locks: Vec<LockTimer>,
    status_led_pin: PinId,
    running: bool,
    /// Bumped on every Start and Reset; lock events from older runs are
    /// discarded.
    run_seq: u64,
    started_at: Option<DateTime<Utc>>,
    start_button: Button,
    reset_button: Button,
    lock_events_tx: mpsc::Sender<LockEvent>,
    lock_events_rx: mpsc::Receiver<LockEvent>,
    requests_rx: mpsc::Receiver<BoardRequest>,
}

enum Wakeup {
    StartButton(Result<Result<Trigger, GpioError>, oneshot::error::RecvError>),
    ResetButton(Result<Result<Trigger, GpioError>, oneshot::error::RecvError>),
    Lock(Option<LockEvent>),
    Request(Option<BoardRequest>),
}

impl Board {
    fn new(
        config: &Config,
        driver: Arc<dyn PinDriver>,
        requests_rx: mpsc::Receiver<BoardRequest>,
    ) -> Self {
        let debounce = config.lock_debounce();
        let locks = config
            .locks
            .iter()
            .map(|lc| LockTimer::new(lc, debounce))
            .collect();
        let (lock_events_tx, lock_events_rx) = mpsc::channel(16);
        let start_button = Button::spawn("start", config.start_button_pin, driver.clone(), None);
        let reset_button = Button::spawn("reset", config.reset_button_pin, driver.clone(), None);
        Self {
            driver,
            locks,
            status_led_pin: config.status_led_pin,
            running: false,
            run_seq: 0,
            started_at: None,
            start_button,
            reset_button,
            lock_events_tx,
            lock_events_rx,
            requests_rx,
        }
    }

    async fn run(mut self) {
        self.set_status_led(Level::Low).await;
        tracing::info!(locks = self.locks.len(), "board supervisor up");

        loop {
            let wake = tokio::select! {
                r = &mut self.start_button.triggered => Wakeup::StartButton(r),
                r = &mut self.reset_button.triggered => Wakeup::ResetButton(r),
                ev = self.lock_events_rx.recv() => Wakeup::Lock(ev),
                req = self.requests_rx.recv() => Wakeup::Request(req),
            };

            match wake {
                Wakeup::StartButton(r) => {
                    if self.on_button_result(true, r) {
                        self.handle_start().await;
                    }
                }
                Wakeup::ResetButton(r) => {
                    if self.on_button_result(false, r) {
                        self.handle_reset().await;
                    }
                }
                Wakeup::Lock(Some(event)) => self.on_lock_event(event),
                Wakeup::Lock(None) => {}
                Wakeup::Request(Some(request)) => {
                    if let Some(ack) = self.on_request(request).await {
                        // Shutdown: already reset, tear down the buttons.
                        let Board {
                            start_button,
                            reset_button,
                            ..
                        } = self;
                        start_button.cancel().await;
                        reset_button.cancel().await;
                        let _ = ack.send(());
                        tracing::info!("board supervisor down");
                        return;
                    }
                }
                Wakeup::Request(None) => {
                    // All handles dropped; tear down without an ack.
                    let Board {
                        mut locks,
                        start_button,
                        reset_button,
                        ..
                    } = self;
                    for lock in &mut locks {
                        lock.stop().await;
                    }
                    start_button.cancel().await;
                    reset_button.cancel().await;
                    tracing::info!("board supervisor down");
                    return;
                }
            }
        }
    }

    /// Handle a button watcher result. Returns true when the corresponding
    /// transition should be dispatched.
    fn on_button_result(
        &mut self,
        is_start: bool,
        result: Result<Result<Trigger, GpioError>, oneshot::error::RecvError>,
    ) -> bool {
        let button = if is_start {
            &mut self.start_button
        } else {
            &mut self.reset_button
        };
        match result {
            Ok(Ok(trigger)) => {
                tracing::info!(button = button.label, "button pressed");
                let driver = self.driver.clone();
                button.relaunch(driver, trigger.at);
                true
            }
            Ok(Err(e)) => {
                // Persistent electrical fault; do not hot-loop a relaunch.
                // The board stays controllable over the request channel.
                tracing::error!(button = button.label, error = %e, "button watcher failed, parking button");
                button.park();
                false
            }
            Err(_) => {
                tracing::warn!(button = button.label, "button watcher went away");
                button.park();
                false
            }
        }
    }

    async fn on_request(&mut self, request: BoardRequest) -> Option<oneshot::Sender<()>> {
        match request {
            BoardRequest::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
                None
            }
            BoardRequest::Start { respond_to } => {
                self.handle_start().await;
                let _ = respond_to.send(());
                None
            }
            BoardRequest::Reset { respond_to } => {
                self.handle_reset().await;
                let _ = respond_to.send(());
                None
            }
            BoardRequest::Shutdown { respond_to } => {
                self.handle_reset().await;
                Some(respond_to)
            }
        }
    }

    async fn handle_start(&mut self) {
        if self.running {
            tracing::debug!("start ignored: already running");
            return;
        }

        let now = Instant::now();
        self.running = true;
        self.run_seq += 1;
        self.started_at = Some(Utc::now());
        self.set_status_led(Level::High).await;

        for (index, lock) in self.locks.iter_mut().enumerate() {
            lock.start(
                self.driver.clone(),
                now,
                index,
                self.run_seq,
                self.lock_events_tx.clone(),
            );
        }
        tracing::info!(run = self.run_seq, locks = self.locks.len(), "run started");
    }

    async fn handle_reset(&mut self) {
        // Invalidate any trigger still in flight from the run being torn
        // down.
        self.run_seq += 1;

        for lock in &mut self.locks {
            if lock.pick_duration().is_none() {
                lock.stop().await;
            }
        }

        self.set_status_led(Level::Low).await;
        self.started_at = None;
        self.running = false;

        // Every lock returns to "unset", solved or not.
        for lock in &mut self.locks {
            lock.reset();
        }
        tracing::info!("board reset to idle");
    }

    fn on_lock_event(&mut self, event: LockEvent) {
        if !self.running || event.run_seq != self.run_seq {
            tracing::debug!(index = event.index, "stale lock event ignored");
            return;
        }
        let lock = &mut self.locks[event.index];
        match event.outcome {
            Ok(duration) => {
                tracing::info!(lock = lock.name(), ?duration, "lock solved");
                lock.record_solved(duration);
            }
            Err(e) => {
                // Unrecoverable hardware fault on this lock; the rest of the
                // run continues and the fault shows up in the snapshot.
                tracing::error!(lock = lock.name(), error = %e, "lock sensor fault");
                lock.record_fault(&e);
            }
        }
    }

    fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot {
            running: self.running,
            started_at: self.started_at,
            locks: self
                .locks
                .iter()
                .map(|lock| LockSnapshot {
                    name: lock.name().to_string(),
                    pick_duration_ms: lock.pick_duration().map(|d| d.as_millis() as u64),
                    fault: lock.fault().map(str::to_string),
                })
                .collect(),
        }
    }

    async fn set_status_led(&self, level: Level) {
        // An LED write failure must not block a transition or shutdown.
        if let Err(e) = self.driver.write_level(self.status_led_pin, level).await {
            tracing::warn!(error = %e, "status LED write failed");
        }
    }
}
