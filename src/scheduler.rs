//! Frame and timer scheduling capability
//!
//! The viewer never owns a clock. It asks the host for a frame or a timer and
//! the host calls back into [`crate::CanvasViewer::on_frame`] or
//! [`crate::CanvasViewer::on_timer`] when it fires.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Timers the viewer may arm
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Fires after wheel events stop; decides whether to fling
    WheelIdle,
}

pub trait Scheduler {
    /// Request one call to `on_frame` at the next display frame
    fn schedule_frame(&mut self);

    /// Arm `timer` to fire after `delay`, replacing any pending instance
    fn schedule_after(&mut self, delay: Duration, timer: TimerKind);

    fn cancel(&mut self, timer: TimerKind);
}

#[derive(Debug, Default)]
struct ManualState {
    frame_pending: bool,
    frames_requested: usize,
    timers: Vec<(TimerKind, Duration)>,
}

/// Scheduler that only records requests. Tests and the headless runner
/// decide when frames and timers fire.
#[derive(Clone, Debug, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut ManualState) -> T) -> T {
        let mut state = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Consume a pending frame request
    pub fn take_frame(&self) -> bool {
        self.with_state(|s| std::mem::take(&mut s.frame_pending))
    }

    #[must_use]
    pub fn frame_pending(&self) -> bool {
        self.with_state(|s| s.frame_pending)
    }

    #[must_use]
    pub fn frames_requested(&self) -> usize {
        self.with_state(|s| s.frames_requested)
    }

    #[must_use]
    pub fn timer(&self, timer: TimerKind) -> Option<Duration> {
        self.with_state(|s| {
            s.timers
                .iter()
                .find(|(kind, _)| *kind == timer)
                .map(|(_, d)| *d)
        })
    }

    /// Consume a pending timer
    pub fn take_timer(&self, timer: TimerKind) -> bool {
        self.with_state(|s| {
            let before = s.timers.len();
            s.timers.retain(|(kind, _)| *kind != timer);
            s.timers.len() != before
        })
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_frame(&mut self) {
        self.with_state(|s| {
            if !s.frame_pending {
                s.frame_pending = true;
                s.frames_requested += 1;
            }
        });
    }

    fn schedule_after(&mut self, delay: Duration, timer: TimerKind) {
        self.with_state(|s| {
            s.timers.retain(|(kind, _)| *kind != timer);
            s.timers.push((timer, delay));
        });
    }

    fn cancel(&mut self, timer: TimerKind) {
        self.with_state(|s| s.timers.retain(|(kind, _)| *kind != timer));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_requests_coalesce() {
        let mut scheduler = ManualScheduler::new();
        let probe = scheduler.clone();
        scheduler.schedule_frame();
        scheduler.schedule_frame();
        assert_eq!(probe.frames_requested(), 1);
        assert!(probe.take_frame());
        assert!(!probe.take_frame());
    }

    #[test]
    fn timers_replace_and_cancel() {
        let mut scheduler = ManualScheduler::new();
        let probe = scheduler.clone();
        scheduler.schedule_after(Duration::from_millis(10), TimerKind::WheelIdle);
        scheduler.schedule_after(Duration::from_millis(60), TimerKind::WheelIdle);
        assert_eq!(
            probe.timer(TimerKind::WheelIdle),
            Some(Duration::from_millis(60))
        );
        scheduler.cancel(TimerKind::WheelIdle);
        assert!(!probe.take_timer(TimerKind::WheelIdle));
    }
}
