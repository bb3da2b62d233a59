//! Poll-until-true-or-timeout pacing shared by navigation, `locate` and `assert`

use std::time::Duration;

use tokio::time::{sleep, Instant};

use crate::config::RetryOptions;

/// Paces a retry loop against a fixed budget.
///
/// Callers probe first, then call [`Poller::wait`]; a `false` return means
/// the budget is spent and the last probe was the final one.
#[derive(Debug)]
pub struct Poller {
    start: Instant,
    deadline: Instant,
    interval: Duration,
    attempts: usize,
}

impl Poller {
    pub fn new(interval: Duration, budget: Duration) -> Self {
        let start = Instant::now();
        Self {
            start,
            deadline: start + budget,
            interval,
            attempts: 0,
        }
    }

    pub fn from_options(retry: RetryOptions) -> Self {
        Self::new(retry.interval(), retry.timeout())
    }

    /// Sleep until the next probe. Returns `false` once the deadline passed.
    pub async fn wait(&mut self) -> bool {
        self.attempts += 1;
        let now = Instant::now();
        if now >= self.deadline {
            return false;
        }
        sleep(self.interval.min(self.deadline - now)).await;
        true
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }
}
