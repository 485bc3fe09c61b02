//! Per-controller input debouncing
//!
//! While the user types, every keystroke produces a new event. Only the
//! latest one is sent once input has been quiet for the interval.

use std::time::Duration;

use crate::timer::{TimerId, Timers};

#[derive(Debug)]
pub struct Debouncer<E> {
    interval: Duration,
    pending: Option<E>,
    timer: Option<TimerId>,
}

impl<E> Debouncer<E> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: None,
            timer: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Replace the pending event and restart the quiet period
    pub fn schedule<K>(&mut self, event: E, timers: &mut Timers<K>, key: K) {
        if let Some(previous) = self.timer.take() {
            timers.cancel(previous);
        }
        self.pending = Some(event);
        self.timer = Some(timers.arm(self.interval, key));
    }

    /// Event to send when `timer` fires; `None` for a superseded timer
    pub fn on_fire(&mut self, timer: TimerId) -> Option<E> {
        if self.timer != Some(timer) {
            return None;
        }
        self.timer = None;
        self.pending.take()
    }

    /// Drop the pending event without sending it
    pub fn cancel<K>(&mut self, timers: &mut Timers<K>) {
        if let Some(timer) = self.timer.take() {
            timers.cancel(timer);
        }
        self.pending = None;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
