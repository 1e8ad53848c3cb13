//! Debounced one-shot pin watcher. Each watcher is a tokio task that samples
//! one input pin every [`SAMPLE_INTERVAL`], emits at most one trigger on a
//! oneshot channel, and then terminates. Cancellation is a two-way handshake:
//! the owner sends the cancel signal and awaits the task before assuming the
//! pin is quiet.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, sleep};

use crate::gpio::{GpioError, Level, PinDriver, PinId};

/// Fixed sampling interval. Small enough to catch mechanical transitions,
/// large enough not to saturate an embedded CPU.
pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(10);

/// Debounce state for a watcher. `last_trigger` is carried across watcher
/// restarts so the quiet-window invariant holds even though each watcher
/// fires at most once.
#[derive(Debug, Clone, Copy)]
pub struct Debounce {
    pub window: Duration,
    pub last_trigger: Option<Instant>,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_trigger: None,
        }
    }

    pub fn since(window: Duration, last_trigger: Instant) -> Self {
        Self {
            window,
            last_trigger: Some(last_trigger),
        }
    }

    fn quiet(&self, now: Instant) -> bool {
        match self.last_trigger {
            Some(last) => now.duration_since(last) >= self.window,
            None => true,
        }
    }
}

/// A confirmed, debounced transition to the target level.
#[derive(Debug, Clone, Copy)]
pub struct Trigger {
    pub at: Instant,
}

/// Control half of a spawned watcher. Dropping the handle without calling
/// [`WatcherHandle::cancel`] also stops the task on its next sampling cycle,
/// but without the handshake.
#[derive(Debug)]
pub struct WatcherHandle {
    cancel_tx: oneshot::Sender<()>,
    join: JoinHandle<()>,
}

impl WatcherHandle {
    /// Cancel the watcher and wait for it to stop. After this returns the
    /// task has exited and no trigger will ever be delivered.
    pub async fn cancel(self) {
        let _ = self.cancel_tx.send(());
        let _ = self.join.await;
    }
}

pub type TriggerRx = oneshot::Receiver<Result<Trigger, GpioError>>;

/// Spawn a watcher on `pin`. The receiver yields exactly one message (a
/// trigger or a fatal read error) unless the watcher is cancelled first, in
/// which case the sender side is dropped and the receiver resolves to an
/// error.
pub fn spawn(
    driver: Arc<dyn PinDriver>,
    pin: PinId,
    target: Level,
    debounce: Option<Debounce>,
) -> (WatcherHandle, TriggerRx) {
    let (trigger_tx, trigger_rx) = oneshot::channel();
    let (cancel_tx, cancel_rx) = oneshot::channel();
    let join = tokio::spawn(watch(driver, pin, target, debounce, trigger_tx, cancel_rx));
    (WatcherHandle { cancel_tx, join }, trigger_rx)
}

async fn watch(
    driver: Arc<dyn PinDriver>,
    pin: PinId,
    target: Level,
    debounce: Option<Debounce>,
    trigger_tx: oneshot::Sender<Result<Trigger, GpioError>>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    loop {
        // Cancellation is observed once per sampling cycle, between reads.
        match cancel_rx.try_recv() {
            Err(TryRecvError::Empty) => {}
            Ok(()) | Err(TryRecvError::Closed) => {
                tracing::debug!(pin, "pin watcher cancelled");
                return;
            }
        }

        let now = Instant::now();
        if debounce.is_none_or(|d| d.quiet(now)) {
            match driver.read_level(pin).await {
                Ok(level) if level == target => {
                    tracing::debug!(pin, ?level, "pin watcher triggered");
                    let _ = trigger_tx.send(Ok(Trigger { at: now }));
                    return;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(pin, error = %e, "pin read failed, watcher stopping");
                    let _ = trigger_tx.send(Err(e));
                    return;
                }
            }
        }

        sleep(SAMPLE_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimulatedGpio;

    fn sim_with(pin: PinId, level: Level) -> Arc<SimulatedGpio> {
        let gpio = Arc::new(SimulatedGpio::new());
        gpio.set_level(pin, level);
        gpio
    }

    #[tokio::test(start_paused = true)]
    async fn triggers_immediately_when_level_already_at_target() {
        let gpio = sim_with(5, Level::High);
        let started = Instant::now();
        let (_handle, rx) = spawn(gpio, 5, Level::High, None);
        let trigger = rx.await.unwrap().unwrap();
        assert!(trigger.at.duration_since(started) < SAMPLE_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn samples_until_target_level_appears() {
        let gpio = sim_with(5, Level::Low);
        let started = Instant::now();
        let (_handle, rx) = spawn(gpio.clone(), 5, Level::High, None);

        tokio::spawn(async move {
            sleep(Duration::from_millis(55)).await;
            gpio.set_level(5, Level::High);
        });

        let trigger = rx.await.unwrap().unwrap();
        let elapsed = trigger.at.duration_since(started);
        assert!(elapsed >= Duration::from_millis(55), "elapsed {elapsed:?}");
        assert!(
            elapsed <= Duration::from_millis(55) + SAMPLE_INTERVAL * 2,
            "elapsed {elapsed:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_window_holds_off_retrigger() {
        let gpio = sim_with(5, Level::High);
        let window = Duration::from_secs(1);
        let started = Instant::now();
        let (_handle, rx) = spawn(
            gpio,
            5,
            Level::High,
            Some(Debounce::since(window, started)),
        );
        let trigger = rx.await.unwrap().unwrap();
        assert!(trigger.at.duration_since(started) >= window);
    }

    #[tokio::test(start_paused = true)]
    async fn oscillating_pin_triggers_at_most_once_per_window() {
        use tokio::time::timeout;

        let gpio = sim_with(5, Level::Low);
        let window = Duration::from_secs(1);

        // Flip the pin to the target level every 100ms for 3 seconds, much
        // faster than the debounce window.
        {
            let gpio = gpio.clone();
            tokio::spawn(async move {
                for _ in 0..30 {
                    gpio.set_level(5, Level::High);
                    sleep(Duration::from_millis(50)).await;
                    gpio.set_level(5, Level::Low);
                    sleep(Duration::from_millis(50)).await;
                }
            });
        }

        // Relaunch after each firing with the previous trigger carried into
        // the debounce state, the way the supervisor relaunches its button
        // watchers.
        let mut last_trigger = None;
        let mut triggers: Vec<Instant> = Vec::new();
        loop {
            let (handle, rx) = spawn(
                gpio.clone(),
                5,
                Level::High,
                Some(Debounce { window, last_trigger }),
            );
            match timeout(Duration::from_secs(5), rx).await {
                Ok(Ok(Ok(trigger))) => {
                    triggers.push(trigger.at);
                    last_trigger = Some(trigger.at);
                }
                Ok(_) => break,
                Err(_) => {
                    // Oscillation is over and the pin sits low; stop the
                    // pending watcher.
                    handle.cancel().await;
                    break;
                }
            }
            assert!(triggers.len() <= 10, "watcher fired without debouncing");
        }

        // A 1s window over 3s of oscillation allows at most 3 triggers.
        assert!(!triggers.is_empty());
        assert!(triggers.len() <= 3, "got {} triggers", triggers.len());
        for pair in triggers.windows(2) {
            assert!(
                pair[1].duration_since(pair[0]) >= window,
                "triggers closer than the debounce window"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_handshake_suppresses_trigger() {
        // Pin sits at the target level the whole time, but a large debounce
        // window keeps the watcher from firing until well after we cancel.
        let gpio = sim_with(5, Level::High);
        let (handle, rx) = spawn(
            gpio,
            5,
            Level::High,
            Some(Debounce::since(Duration::from_secs(60), Instant::now())),
        );

        sleep(Duration::from_millis(100)).await;
        handle.cancel().await;
        // Sender was dropped without firing.
        assert!(rx.await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn read_failure_is_propagated() {
        let gpio = Arc::new(SimulatedGpio::new());
        gpio.set_level(5, Level::Low);
        gpio.fail_reads(5);
        let (_handle, rx) = spawn(gpio, 5, Level::High, None);
        assert!(matches!(
            rx.await.unwrap(),
            Err(GpioError::Read { pin: 5, .. })
        ));
    }
}
