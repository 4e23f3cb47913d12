//! Periodic control loop with jitter and error backoff.
//!
//! One abstraction replaces ad-hoc polling and retry loops: the autoscaler
//! tick, the worker's queue-depth reporter and the notifier's retry schedule all
//! take their timing from here. Sleeping goes through `tokio::time`, so
//! tests drive it with paused time.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Capped exponential backoff: `base * 2^attempt`, at most `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Runs a tick function every `interval` plus up to `jitter`.
///
/// After a failed tick the loop waits `backoff.delay(n)` instead, where `n`
/// counts consecutive failures; a successful tick resets it.
#[derive(Debug, Clone)]
pub struct ControlLoop {
    name: String,
    interval: Duration,
    jitter: Duration,
    backoff: Backoff,
}

impl ControlLoop {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            interval,
            jitter: Duration::ZERO,
            backoff: Backoff::default(),
        }
    }

    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn jitter_sample(&self) -> Duration {
        let max_ms = self.jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max_ms))
    }

    /// Delay after a tick, given the number of consecutive failures so far.
    pub fn next_delay(&self, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 {
            self.interval + self.jitter_sample()
        } else {
            self.backoff.delay(consecutive_failures - 1)
        }
    }

    /// Run until `shutdown` turns true or its sender is dropped. The first
    /// tick runs immediately. Returns the number of ticks executed.
    pub async fn run<F, Fut, E>(&self, mut shutdown: watch::Receiver<bool>, mut tick: F) -> u64
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: Display,
    {
        let mut ticks = 0u64;
        let mut failures = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }

            match tick().await {
                Ok(()) => failures = 0,
                Err(e) => {
                    failures = failures.saturating_add(1);
                    warn!(control_loop = %self.name, failures, "Tick failed: {}", e);
                }
            }
            ticks += 1;

            let delay = self.next_delay(failures);
            debug!(control_loop = %self.name, ?delay, "Next tick scheduled");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        debug!(control_loop = %self.name, ticks, "Control loop stopped");
        ticks
    }
}
