//! Bounded exponential backoff between connection attempts.

use std::time::Duration;

/// Delay generator for the connect retry loop.
///
/// Starts at `initial`, doubles after every attempt and never exceeds `max`.
/// The caller additionally clamps each delay to the time left before its
/// deadline.
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    next: Duration,
    max: Duration,
}

impl Backoff {
    const INITIAL: Duration = Duration::from_millis(10);
    const MAX: Duration = Duration::from_millis(500);

    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        Self {
            next: initial.min(max),
            max,
        }
    }

    /// Delay to wait before the next attempt.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(self.max);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::INITIAL, Self::MAX)
    }
}
