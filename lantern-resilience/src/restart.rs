//! Restart bookkeeping for crashing child processes

use log::debug;
use std::time::Duration;

use crate::backoff::{BackoffCalculator, BackoffStrategy};

/// Attempt counter plus delay policy for one supervised process
///
/// A process that stayed up for at least `reset_after` before crashing is
/// considered healthy again and restarts with the initial delay.
#[derive(Debug, Clone)]
pub struct RestartBackoff {
    calculator: BackoffCalculator,
    reset_after: Duration,
    attempts: u32,
}

impl RestartBackoff {
    pub fn new(calculator: BackoffCalculator, reset_after: Duration) -> Self {
        Self {
            calculator,
            reset_after,
            attempts: 0,
        }
    }

    /// Capped exponential backoff
    pub fn exponential(
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
        reset_after: Duration,
        jitter: bool,
    ) -> Self {
        Self::new(
            BackoffCalculator::new(
                BackoffStrategy::Exponential { base: multiplier },
                initial_delay,
                max_delay,
                jitter,
            ),
            reset_after,
        )
    }

    /// Delay before restarting a process that crashed after `uptime`
    pub fn next_delay(&mut self, uptime: Duration) -> Duration {
        if uptime >= self.reset_after && self.attempts > 0 {
            debug!(
                "Process was up for {:?}, resetting {} restart attempts",
                uptime, self.attempts
            );
            self.attempts = 0;
        }
        self.attempts = self.attempts.saturating_add(1);
        self.calculator.calculate_delay(self.attempts)
    }

    /// Forget previous crashes, e.g. after an explicit start
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> RestartBackoff {
        RestartBackoff::exponential(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2.0,
            Duration::from_secs(60),
            false,
        )
    }

    #[test]
    fn test_delays_grow_until_capped() {
        let mut restart = backoff();
        let short = Duration::from_secs(5);
        let delays: Vec<u64> = (0..8).map(|_| restart.next_delay(short).as_secs()).collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);
        assert_eq!(restart.attempts(), 8);
    }

    #[test]
    fn test_long_uptime_resets_attempts() {
        let mut restart = backoff();
        restart.next_delay(Duration::from_secs(2));
        restart.next_delay(Duration::from_secs(2));
        assert_eq!(restart.next_delay(Duration::from_secs(2)), Duration::from_secs(4));

        assert_eq!(restart.next_delay(Duration::from_secs(90)), Duration::from_secs(1));
        assert_eq!(restart.attempts(), 1);
    }

    #[test]
    fn test_jittered_delays_stay_near_schedule() {
        let mut restart = RestartBackoff::exponential(
            Duration::from_secs(1),
            Duration::from_secs(60),
            2.0,
            Duration::from_secs(60),
            true,
        );
        let first = restart.next_delay(Duration::ZERO);
        assert!(first >= Duration::from_millis(800) && first < Duration::from_millis(1200));
        let second = restart.next_delay(Duration::ZERO);
        assert!(second >= Duration::from_millis(1600) && second < Duration::from_millis(2400));
    }

    #[test]
    fn test_explicit_reset() {
        let mut restart = backoff();
        restart.next_delay(Duration::ZERO);
        restart.next_delay(Duration::ZERO);
        restart.reset();
        assert_eq!(restart.attempts(), 0);
        assert_eq!(restart.next_delay(Duration::ZERO), Duration::from_secs(1));
    }
}
