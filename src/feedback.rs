//! Countdown feedback sinks.
//!
//! The countdown produces two cues: an audio beep per tick and a terminal
//! haptic at zero. Playback itself is an external collaborator, so the
//! core only knows a fire-and-forget sink; every invocation is independent
//! and nothing is awaited.

use tracing::info;

/// Fire-and-forget output sink for countdown cues.
pub trait FeedbackSink: Send + Sync {
    /// Audio cue fired once per countdown tick.
    fn play_tick(&self);

    /// Haptic cue fired exactly once when the countdown reaches zero.
    fn vibrate_terminal(&self);
}

/// Sink that discards every cue.
pub struct NullFeedback;

impl FeedbackSink for NullFeedback {
    fn play_tick(&self) {}

    fn vibrate_terminal(&self) {}
}

/// Sink that logs every cue.
///
/// The default production sink; a host application wires real audio and
/// haptics by providing its own [`FeedbackSink`].
pub struct TracingFeedback;

impl FeedbackSink for TracingFeedback {
    fn play_tick(&self) {
        info!("tick: beep");
    }

    fn vibrate_terminal(&self) {
        info!("terminal: vibrate");
    }
}
