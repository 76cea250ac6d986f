//! The launch countdown state machine.
//!
//! `Idle → Running → { Finished → Idle | Cancelled → Idle }`. One tick per
//! period, an audio cue per tick, one terminal haptic at zero. The display
//! mimics the console's two-digit LCD: `"88"` at power-on, `"__"` idle,
//! right-aligned seconds while running, `"00"` after the terminal event.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::feedback::FeedbackSink;

/// Power-on self-test pattern shown until the display settles.
pub const POWER_ON_DISPLAY: &str = "88";

/// Display shown while no countdown is running.
pub const IDLE_DISPLAY: &str = "__";

/// Display shown after the terminal event.
pub const FINISHED_DISPLAY: &str = "00";

/// How long the power-on pattern stays up before settling to idle.
pub const DISPLAY_SETTLE: Duration = Duration::from_millis(1_500);

/// Observable countdown state.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CountdownSnapshot {
    /// Whether a countdown is running.
    pub running: bool,
    /// Remaining whole seconds. Monotonically non-increasing while running.
    pub remaining: u32,
    /// The LCD representation.
    pub display: String,
}

/// Event emitted by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    /// A countdown started at the given value.
    Started {
        /// The initial remaining value.
        remaining: u32,
    },
    /// One second elapsed.
    Tick {
        /// Remaining seconds after the decrement.
        remaining: u32,
    },
    /// The countdown reached zero. The irreversible terminal event.
    Finished,
    /// The countdown was cancelled; remaining was reset.
    Cancelled,
}

struct CountdownState {
    running: bool,
    remaining: u32,
    display: String,
}

/// Timer-driven countdown coordinator.
///
/// At most one countdown runs at a time; `start` while running is a no-op.
/// Remaining is mutated only by the tick task and by [`cancel`], both of
/// which serialize on the state lock, so ticks never overlap.
///
/// [`cancel`]: CountdownCoordinator::cancel
pub struct CountdownCoordinator {
    /// Initial remaining value for each run.
    start_value: u32,
    /// Period between ticks.
    tick_period: Duration,
    /// Feedback sinks for the audio and haptic cues.
    feedback: Arc<dyn FeedbackSink>,
    /// Interior state.
    state: Arc<RwLock<CountdownState>>,
    /// Channel for countdown events.
    event_tx: broadcast::Sender<CountdownEvent>,
    /// Handle to the tick task.
    timer_handle: Arc<RwLock<Option<tokio::task::JoinHandle<()>>>>,
}

impl CountdownCoordinator {
    /// Create a coordinator. The display starts in its power-on pattern;
    /// call [`settle_idle_display`] to let it fall to idle.
    ///
    /// [`settle_idle_display`]: CountdownCoordinator::settle_idle_display
    pub fn new(start_value: u32, tick_period: Duration, feedback: Arc<dyn FeedbackSink>) -> Self {
        let (event_tx, _) = broadcast::channel(64);

        Self {
            start_value,
            tick_period,
            feedback,
            state: Arc::new(RwLock::new(CountdownState {
                running: false,
                remaining: start_value,
                display: POWER_ON_DISPLAY.to_string(),
            })),
            event_tx,
            timer_handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Check if a countdown is running.
    pub fn is_running(&self) -> bool {
        self.state.read().running
    }

    /// Get the remaining whole seconds.
    pub fn remaining(&self) -> u32 {
        self.state.read().remaining
    }

    /// Get the current display text.
    pub fn display(&self) -> String {
        self.state.read().display.clone()
    }

    /// Get an observable snapshot.
    pub fn snapshot(&self) -> CountdownSnapshot {
        let state = self.state.read();
        CountdownSnapshot {
            running: state.running,
            remaining: state.remaining,
            display: state.display.clone(),
        }
    }

    /// Subscribe to countdown events.
    pub fn subscribe(&self) -> broadcast::Receiver<CountdownEvent> {
        self.event_tx.subscribe()
    }

    /// Let the power-on pattern fall to the idle display after
    /// [`DISPLAY_SETTLE`], unless a countdown started in the meantime.
    pub fn settle_idle_display(&self) {
        let state = self.state.clone();
        tokio::spawn(async move {
            tokio::time::sleep(DISPLAY_SETTLE).await;
            let mut state = state.write();
            if !state.running && state.display == POWER_ON_DISPLAY {
                state.display = IDLE_DISPLAY.to_string();
            }
        });
    }

    /// Start the countdown.
    ///
    /// A no-op while already running (returns `false`). Sets remaining to
    /// the initial value, fires the audio cue for it, then ticks once per
    /// period until zero, where the terminal haptic fires exactly once.
    pub fn start(&self) -> bool {
        {
            let mut state = self.state.write();
            if state.running {
                debug!("Countdown already running, ignoring start");
                return false;
            }
            state.running = true;
            state.remaining = self.start_value;
            state.display = running_display(self.start_value);
        }

        info!("Countdown started at {}", self.start_value);

        // Audio cue for the initial value, before the first tick elapses.
        self.feedback.play_tick();
        let _ = self.event_tx.send(CountdownEvent::Started {
            remaining: self.start_value,
        });

        // A finished run leaves its handle behind; clear it out.
        if let Some(old) = self.timer_handle.write().take() {
            old.abort();
        }

        let state = self.state.clone();
        let feedback = self.feedback.clone();
        let event_tx = self.event_tx.clone();
        let period = self.tick_period;

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now();
            let mut timer = tokio::time::interval_at(start + period, period);

            loop {
                timer.tick().await;

                let remaining = {
                    let mut state = state.write();
                    if !state.running {
                        break;
                    }
                    state.remaining -= 1;
                    state.display = if state.remaining == 0 {
                        FINISHED_DISPLAY.to_string()
                    } else {
                        running_display(state.remaining)
                    };
                    if state.remaining == 0 {
                        state.running = false;
                    }
                    state.remaining
                };

                feedback.play_tick();
                let _ = event_tx.send(CountdownEvent::Tick { remaining });

                if remaining == 0 {
                    // The irreversible terminal event.
                    feedback.vibrate_terminal();
                    let _ = event_tx.send(CountdownEvent::Finished);
                    info!("Countdown finished");
                    break;
                }
            }
        });

        *self.timer_handle.write() = Some(handle);
        true
    }

    /// Cancel a running countdown.
    ///
    /// A no-op unless running (returns `false`). Halts the tick task,
    /// resets remaining to the initial value and returns the display to
    /// idle. No feedback cue fires.
    pub fn cancel(&self) -> bool {
        {
            let mut state = self.state.write();
            if !state.running {
                debug!("No countdown running, ignoring cancel");
                return false;
            }
            state.running = false;
            state.remaining = self.start_value;
            state.display = IDLE_DISPLAY.to_string();
        }

        if let Some(handle) = self.timer_handle.write().take() {
            handle.abort();
        }

        info!("Countdown cancelled");
        let _ = self.event_tx.send(CountdownEvent::Cancelled);
        true
    }
}

impl Drop for CountdownCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.timer_handle.write().take() {
            handle.abort();
        }
    }
}

/// Two-character LCD rendering of a running value.
fn running_display(remaining: u32) -> String {
    format!("{:>2}", remaining)
}
