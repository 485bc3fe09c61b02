//! Cancellable one-shot timers
//!
//! Each armed timer is a task that sleeps and then posts its id back to the
//! runtime loop. Ids are never reused, so a fire that races a cancellation is
//! recognised by [`Timers::take`] returning `None` and ignored.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::identity::ExtensionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

pub type TimerSender = mpsc::UnboundedSender<TimerId>;
pub type TimerReceiver = mpsc::UnboundedReceiver<TimerId>;

/// What a runtime timer is for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimerKind {
    /// Send the latest coalesced event of a controller
    Debounce(ExtensionId),
    /// Show the "Loading..." placeholder for the active query
    Loading,
    /// SIGKILL a process that ignored SIGTERM
    Kill { generation: u64 },
    /// Start a crashed extension again
    Restart(ExtensionId),
}

/// Armed timers keyed by id
pub struct Timers<K> {
    next_id: u64,
    armed: HashMap<TimerId, (K, JoinHandle<()>)>,
    fired: TimerSender,
}

impl<K> Timers<K> {
    pub fn new(fired: TimerSender) -> Self {
        Self {
            next_id: 1,
            armed: HashMap::new(),
            fired,
        }
    }

    /// Timer table plus the receiving end of its fire channel
    pub fn channel() -> (Self, TimerReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    /// Fire `key` after `delay`
    pub fn arm(&mut self, delay: Duration, key: K) -> TimerId {
        let id = TimerId(self.next_id);
        self.next_id += 1;

        let fired = self.fired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired.send(id);
        });
        self.armed.insert(id, (key, handle));
        id
    }

    /// Cancel an armed timer; `None` if it already fired or was cancelled
    pub fn cancel(&mut self, id: TimerId) -> Option<K> {
        self.armed.remove(&id).map(|(key, handle)| {
            handle.abort();
            key
        })
    }

    /// Claim a fired timer; `None` means it was cancelled in the meantime
    pub fn take(&mut self, id: TimerId) -> Option<K> {
        self.armed.remove(&id).map(|(key, _)| key)
    }

    pub fn is_armed(&self, id: TimerId) -> bool {
        self.armed.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl<K> Drop for Timers<K> {
    fn drop(&mut self) {
        for (_, (_, handle)) in self.armed.drain() {
            handle.abort();
        }
    }
}

impl<K> fmt::Debug for Timers<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timers")
            .field("next_id", &self.next_id)
            .field("armed", &self.armed.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let (mut timers, mut fired) = Timers::channel();
        let id = timers.arm(Duration::from_millis(300), "loading");
        assert!(timers.is_armed(id));

        assert_eq!(fired.recv().await, Some(id));
        assert_eq!(timers.take(id), Some("loading"));
        assert_eq!(timers.take(id), None);
        assert!(timers.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (mut timers, mut fired) = Timers::channel();
        let cancelled = timers.arm(Duration::from_millis(50), 1);
        let kept = timers.arm(Duration::from_millis(100), 2);

        assert_eq!(timers.cancel(cancelled), Some(1));
        assert_eq!(timers.cancel(cancelled), None);

        assert_eq!(fired.recv().await, Some(kept));
        assert_eq!(timers.take(kept), Some(2));
        assert!(tokio::time::timeout(Duration::from_secs(5), fired.recv())
            .await
            .is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ids_are_not_reused() {
        let (mut timers, _fired) = Timers::channel();
        let first = timers.arm(Duration::from_secs(1), ());
        timers.cancel(first);
        let second = timers.arm(Duration::from_secs(1), ());
        assert_ne!(first, second);
        assert_eq!(timers.len(), 1);
    }
}
