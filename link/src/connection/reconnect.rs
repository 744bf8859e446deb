//! Reconnect scheduling: URL failover with backoff.
//!
//! The URL list is shuffled once and then walked with a cursor. Each failed
//! attempt moves to the next URL with no delay; only once every URL has
//! failed does the scheduler wrap around and apply exponential backoff with
//! jitter. A successful WELCOME resets the cursor, the backoff and the
//! attempt budget.

use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use std::time::Duration;

/// Where and when to connect next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectStep {
    pub url: String,
    pub delay: Duration,
}

#[derive(Debug)]
pub struct ReconnectScheduler {
    urls: Vec<String>,
    cursor: usize,
    /// Failed attempts since the last reset.
    attempts: u32,
    /// Completed passes over the URL list since the last reset.
    cycles: u32,
    max_attempts: u32,
    max_delay: Duration,
    rng: StdRng,
}

impl ReconnectScheduler {
    /// `seed` makes the shuffle and jitter reproducible.
    pub fn new(mut urls: Vec<String>, max_attempts: u32, max_delay: Duration, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        urls.shuffle(&mut rng);
        Self {
            urls,
            cursor: 0,
            attempts: 0,
            cycles: 0,
            max_attempts,
            max_delay,
            rng,
        }
    }

    /// URLs in connection order.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// The next URL to try. Delay is zero while untried URLs remain in the
    /// current pass, and backoff once the pass is exhausted.
    pub fn next_target(&mut self) -> Option<ReconnectStep> {
        if self.urls.is_empty() {
            return None;
        }

        let mut delay = Duration::ZERO;
        if self.cursor >= self.urls.len() {
            self.cursor = 0;
            self.cycles = self.cycles.saturating_add(1);
            delay = self.backoff();
        }

        let url = self.urls[self.cursor].clone();
        self.cursor += 1;
        Some(ReconnectStep { url, delay })
    }

    /// Count one failed attempt. Returns `false` once the budget is spent.
    pub fn record_failure(&mut self) -> bool {
        self.attempts = self.attempts.saturating_add(1);
        self.attempts <= self.max_attempts
    }

    /// Called on every successful WELCOME.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.attempts = 0;
        self.cycles = 0;
    }

    /// `2^cycles` seconds, scaled by a random factor in [0.5, 1.5), capped.
    fn backoff(&mut self) -> Duration {
        let base = 2f64.powi(self.cycles.min(30) as i32);
        let jitter: f64 = self.rng.random_range(0.5..1.5);
        Duration::from_secs_f64(base * jitter).min(self.max_delay)
    }
}
