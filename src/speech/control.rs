//! Pause/stop handle shared between a speech thread and its controllers.

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use super::lock;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ControlSnapshot {
    pub paused: bool,
    pub stopped: bool,
    pub finished: bool,
    pub segments_total: usize,
    pub segments_spoken: usize,
}

/// Every state change notifies the condvar, so waiters never poll.
#[derive(Debug, Default)]
pub struct SpeechControl {
    state: Mutex<ControlSnapshot>,
    changed: Condvar,
}

impl SpeechControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.update(|s| s.paused = true);
    }

    pub fn resume(&self) {
        self.update(|s| s.paused = false);
    }

    /// Stop is final; a stopped session cannot be resumed.
    pub fn stop(&self) {
        self.update(|s| s.stopped = true);
    }

    pub fn is_stopped(&self) -> bool {
        lock(&self.state).stopped
    }

    pub fn is_finished(&self) -> bool {
        lock(&self.state).finished
    }

    pub fn snapshot(&self) -> ControlSnapshot {
        *lock(&self.state)
    }

    /// Block while paused and not stopped. Returns whether stop was requested.
    pub fn wait_while_paused(&self) -> bool {
        let guard = lock(&self.state);
        let guard = self
            .changed
            .wait_while(guard, |s| s.paused && !s.stopped)
            .unwrap_or_else(PoisonError::into_inner);
        guard.stopped
    }

    /// Block until the session finishes or `timeout` elapses. Returns whether it finished.
    pub fn wait_finished(&self, timeout: Duration) -> bool {
        let guard = lock(&self.state);
        let (guard, _) = self
            .changed
            .wait_timeout_while(guard, timeout, |s| !s.finished)
            .unwrap_or_else(PoisonError::into_inner);
        guard.finished
    }

    pub(crate) fn set_total(&self, total: usize) {
        self.update(|s| s.segments_total = total);
    }

    pub(crate) fn record_spoken(&self) {
        self.update(|s| s.segments_spoken += 1);
    }

    pub(crate) fn mark_finished(&self) {
        self.update(|s| s.finished = true);
    }

    fn update(&self, f: impl FnOnce(&mut ControlSnapshot)) {
        {
            let mut state = lock(&self.state);
            f(&mut *state);
        }
        self.changed.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn wait_returns_immediately_when_not_paused() {
        let control = SpeechControl::new();
        assert!(!control.wait_while_paused());
    }

    #[test]
    fn resume_wakes_a_paused_waiter() {
        let control = Arc::new(SpeechControl::new());
        control.pause();

        let waiter = {
            let control = control.clone();
            thread::spawn(move || control.wait_while_paused())
        };
        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        control.resume();
        assert!(!waiter.join().unwrap());
    }

    #[test]
    fn stop_wakes_a_paused_waiter_and_reports_stop() {
        let control = Arc::new(SpeechControl::new());
        control.pause();

        let waiter = {
            let control = control.clone();
            thread::spawn(move || control.wait_while_paused())
        };
        control.stop();
        assert!(waiter.join().unwrap());
        assert!(control.snapshot().paused);
    }

    #[test]
    fn wait_finished_times_out_until_marked() {
        let control = SpeechControl::new();
        assert!(!control.wait_finished(Duration::from_millis(10)));
        control.mark_finished();
        assert!(control.wait_finished(Duration::from_millis(10)));
    }
}
