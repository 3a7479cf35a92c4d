//! Bounded backoff for waiting on peer progress.
//!
//! The relay enforces the 5-minute handshake deadline; the client gives
//! up sooner (2 minutes by default) and abandons locally.  Abandonment
//! never mutates the ledger — the record expires on its own.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    /// Total wall-clock budget before the attempt is abandoned.
    pub max_elapsed: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(250),
            max_interval: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(120),
        }
    }
}

/// Doubling backoff with a deadline. Dropping it cancels cleanly; no
/// background task holds any state.
pub struct Backoff {
    config: PollConfig,
    next_interval: Duration,
    started: Instant,
}

impl Backoff {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            next_interval: config.initial_interval,
            started: Instant::now(),
        }
    }

    /// Sleep until the next attempt. Returns `false` once the total
    /// budget is spent (sleeping would cross the deadline).
    pub async fn wait(&mut self) -> bool {
        let elapsed = self.started.elapsed();
        if elapsed + self.next_interval > self.config.max_elapsed {
            return false;
        }
        tokio::time::sleep(self.next_interval).await;
        self.next_interval = (self.next_interval * 2).min(self.config.max_interval);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_until_capped() {
        let mut backoff = Backoff::new(PollConfig {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(400),
            max_elapsed: Duration::from_secs(10),
        });

        assert!(backoff.wait().await);
        assert_eq!(backoff.next_interval, Duration::from_millis(200));
        assert!(backoff.wait().await);
        assert_eq!(backoff.next_interval, Duration::from_millis(400));
        assert!(backoff.wait().await);
        // Capped, not doubled again.
        assert_eq!(backoff.next_interval, Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_stops_the_loop() {
        let mut backoff = Backoff::new(PollConfig {
            initial_interval: Duration::from_millis(100),
            max_interval: Duration::from_millis(100),
            max_elapsed: Duration::from_millis(250),
        });

        assert!(backoff.wait().await);
        assert!(backoff.wait().await);
        // A third sleep would cross the 250ms budget.
        assert!(!backoff.wait().await);
    }
}
