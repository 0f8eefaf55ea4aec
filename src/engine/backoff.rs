//! Exponential backoff for readiness polling.

use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::EngineError;

/// Exponential backoff parameters.
///
/// The interval starts at `initial_interval`, grows by `multiplier` after
/// every failed attempt up to `max_interval`, and retrying stops once the
/// next sleep would cross `max_elapsed`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Ceiling on total time spent retrying.
    pub max_elapsed: Duration,
    /// Jitter as a fraction of the interval (0.0 disables it).
    pub randomization: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(500),
            multiplier: 1.5,
            max_interval: Duration::from_secs(15),
            max_elapsed: Duration::from_secs(60),
            randomization: 0.5,
        }
    }
}

impl BackoffPolicy {
    /// A policy with a constant interval and no jitter.
    pub fn constant(interval: Duration, max_elapsed: Duration) -> Self {
        Self {
            initial_interval: interval,
            multiplier: 1.0,
            max_interval: interval,
            max_elapsed,
            randomization: 0.0,
        }
    }

    /// Un-jittered interval before retry number `attempt` (1-based).
    pub fn interval(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.max(1.0).powi(exp);
        let capped = secs.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    fn jittered(&self, base: Duration) -> Duration {
        if self.randomization <= 0.0 {
            return base;
        }
        let delta = base.as_secs_f64() * self.randomization.min(1.0);
        let lo = base.as_secs_f64() - delta;
        let hi = base.as_secs_f64() + delta;
        Duration::from_secs_f64(rand::thread_rng().gen_range(lo..=hi))
    }

    /// Run `probe` until it succeeds or the elapsed ceiling is hit.
    ///
    /// Returns the number of attempts taken on success.
    pub async fn retry<F, Fut, E>(&self, mut probe: F) -> Result<u32, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        let start = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let err = match probe().await {
                Ok(()) => return Ok(attempt),
                Err(e) => e,
            };

            let sleep = self.jittered(self.interval(attempt));
            let elapsed = start.elapsed();
            if elapsed + sleep > self.max_elapsed {
                return Err(EngineError::RetryExhausted {
                    attempts: attempt,
                    elapsed,
                    last_error: err.to_string(),
                });
            }

            tracing::trace!(attempt, error = %err, "Probe failed, backing off {:?}", sleep);
            tokio::time::sleep(sleep).await;
        }
    }
}
