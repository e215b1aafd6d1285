//! Bounded polling
//!
//! Every wait in the engine is a loop of probes against an explicit
//! deadline. The caller probes, then asks the deadline whether another
//! probe is allowed; the deadline sleeps (cooperatively) until then.

use std::time::Duration;
use tokio::time::{self, Instant};

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Instant,
    interval: Duration,
}

impl Deadline {
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            expires_at: Instant::now() + timeout,
            interval,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }

    /// Sleeps until the next probe is due
    ///
    /// Returns `false` without sleeping once the deadline has passed. The last
    /// sleep is shortened so a final probe happens exactly at the deadline.
    pub async fn wait_next(&self) -> bool {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return false;
        }
        time::sleep(self.interval.min(remaining)).await;
        true
    }
}
