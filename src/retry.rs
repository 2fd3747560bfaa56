use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::util::jittered;

/// Bounded retry with escalating-by-repetition delay, kept as data so every
/// waiting point in the pipeline shares one primitive.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            jitter: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn next_delay(&self) -> Duration {
        jittered(self.base_delay, self.jitter)
    }

    /// Runs `operation` until it succeeds or `max_attempts` is exhausted,
    /// sleeping between attempts. The closure receives the 1-based attempt
    /// number. The last error is returned on exhaustion.
    pub fn run<T, E, F>(&self, operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_with(operation, thread::sleep)
    }

    /// Same as [`run`](Self::run) with an injectable sleeper.
    pub fn run_with<T, E, F, S>(&self, mut operation: F, mut sleep: S) -> Result<T, E>
    where
        F: FnMut(u32) -> Result<T, E>,
        S: FnMut(Duration),
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.max_attempts.max(1) => return Err(err),
                Err(_) => sleep(self.next_delay()),
            }
        }
    }
}

/// Tracks consecutive unresolved outcomes across iterations of a longer
/// loop. Crossing the threshold yields one long cooldown and resets the
/// counter, absorbing sustained remote slow-downs without aborting the run.
#[derive(Debug)]
pub struct CircuitBreaker {
    threshold: u32,
    cooldown: Duration,
    consecutive: u32,
}

impl CircuitBreaker {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            cooldown,
            consecutive: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive = 0;
    }

    /// Returns the cooldown to apply when this failure trips the breaker.
    pub fn record_failure(&mut self) -> Option<Duration> {
        self.consecutive += 1;
        if self.consecutive >= self.threshold {
            warn!(
                consecutive = self.consecutive,
                "too many consecutive failures, cooling down"
            );
            self.consecutive = 0;
            Some(jittered(self.cooldown, 0.5))
        } else {
            None
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive
    }
}
