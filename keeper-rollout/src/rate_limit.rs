//! Sliding-window request ceiling for plugin directory lookups.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::retry::Sleeper;

const MAX_SLEEP: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct RateLimiter {
    limit: usize,
    window: Duration,
    sent: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            limit: limit.max(1),
            window,
            sent: VecDeque::new(),
        }
    }

    pub fn per_minute(limit: usize) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    /// Record a request at `now` if the window has room, otherwise return how
    /// long until the oldest request leaves the window.
    pub fn admit(&mut self, now: Instant) -> Result<(), Duration> {
        while let Some(&oldest) = self.sent.front() {
            if now.duration_since(oldest) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
        if self.sent.len() < self.limit {
            self.sent.push_back(now);
            return Ok(());
        }
        let oldest = self.sent.front().copied().unwrap_or(now);
        Err(self.window.saturating_sub(now.duration_since(oldest)))
    }

    /// Block until a request is admitted, sleeping in short steps.
    pub fn acquire(&mut self, sleeper: &dyn Sleeper) {
        while let Err(wait) = self.admit(Instant::now()) {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "plugin lookup rate limited");
            sleeper.sleep(wait.min(MAX_SLEEP));
        }
    }
}
