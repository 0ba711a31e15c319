//! Exponential backoff with jitter for retry loops
//!
//! [`Backoff`] keeps a single "current delay". Each [`Backoff::wait`] sleeps for
//! it and then grows it: doubled without jitter, or multiplied by a random
//! factor between 1.5 and 2.0 with jitter, so concurrent callers drift apart.
//! Retrying is allowed while the current delay has not grown past the
//! configured maximum.
//!
//! Since every step at most doubles the delay, the waits taken before
//! [`Backoff::should_retry`] turns false always add up to at least
//! `max - min`.

use crate::config::BackoffConfig;
use rand::Rng;
use std::time::Duration;
use tracing::*;

const GROWTH_FACTOR: f64 = 2.0;
const MIN_JITTER_FACTOR: f64 = 1.5;
/// Smallest floor accepted, a zero floor would never grow
pub const MINIMUM_DELAY: Duration = Duration::from_millis(1);

/// Exponential backoff policy
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Floor for every delay
    min: Duration,
    /// Retries stop once the delay passes this
    max: Duration,
    /// Whether growth is randomized
    jitter: bool,
    /// Delay used by the next wait
    current: Duration,
}

impl Backoff {
    /// Create a backoff starting at `min`, floored at [`MINIMUM_DELAY`]
    pub fn new(min: Duration, max: Duration, jitter: bool) -> Self {
        let min = min.max(MINIMUM_DELAY);
        Self {
            min,
            max,
            jitter,
            current: min,
        }
    }

    pub fn from_config(config: &BackoffConfig) -> Self {
        Self::new(config.min_delay, config.max_delay, config.jitter)
    }

    /// True while the current delay has not exceeded the maximum
    pub fn should_retry(&self) -> bool {
        self.current <= self.max
    }

    /// Sleep for the current delay, then advance it
    pub async fn wait(&mut self) {
        let delay = self.current.min(self.max);
        trace!("backing off for {:?}", delay);
        tokio::time::sleep(delay).await;
        self.next_delay();
    }

    /// Advance the schedule without sleeping and return the new current delay
    pub fn next_delay(&mut self) -> Duration {
        let factor = if self.jitter {
            rand::thread_rng().gen_range(MIN_JITTER_FACTOR..=GROWTH_FACTOR)
        } else {
            GROWTH_FACTOR
        };
        self.current = self.current.mul_f64(factor).max(self.min);
        self.current
    }

    /// Raise the floor of future delays, clamping the current delay upward
    pub fn set_minimum(&mut self, min: Duration) {
        let min = min.max(MINIMUM_DELAY);
        self.min = min;
        if self.current < min {
            self.current = min;
        }
    }

    /// Start over from the minimum
    pub fn reset(&mut self) {
        self.current = self.min;
    }

    pub fn current_delay(&self) -> Duration {
        self.current
    }

    pub fn minimum(&self) -> Duration {
        self.min
    }

    pub fn maximum(&self) -> Duration {
        self.max
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::from_config(&BackoffConfig::default())
    }
}
