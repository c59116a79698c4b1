use std::time::Duration;
use thiserror::Error;

/// The reason a [`TimedWaiter`](crate::TimedWaiter) is rejected with when its
/// deadline elapses before anything else settles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("timed out: max wait was {}ms", .max_wait.as_millis())]
pub struct TimeoutError {
    max_wait: Duration,
}

impl TimeoutError {
    pub fn new(max_wait: Duration) -> Self {
        Self { max_wait }
    }

    /// The deadline the waiter was configured with.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }
}
