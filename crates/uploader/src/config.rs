//! Upload tuning.

use std::time::Duration;

use ferry_protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_RETRY_LIMIT};
use ferry_transfer::ValidationRules;

/// Default number of chunks in flight.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Bounded whole-upload retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Genuine failures tolerated; reaching it fails the upload.
    pub limit: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Backoff cap.
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry.
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            limit: DEFAULT_RETRY_LIMIT,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    ///
    /// The exponential step is capped at `max_delay`; the returned delay is
    /// drawn from the upper half of it, so retries of concurrent uploads
    /// spread out but never drop below half the step.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let step = Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        let half = step / 2;
        half + half.mul_f64(spread())
    }
}

/// Pseudo-random fraction in `[0, 1)` taken from the clock's sub-second part.
fn spread() -> f64 {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos) / 1e9
}

/// Client-side upload settings.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Must equal the server's chunk size.
    pub chunk_size: u64,
    /// Chunks in flight at once; `None` sends every outstanding chunk at once.
    pub concurrency: Option<usize>,
    pub retry: RetryPolicy,
    pub rules: ValidationRules,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            concurrency: Some(DEFAULT_CONCURRENCY),
            retry: RetryPolicy::default(),
            rules: ValidationRules::default(),
        }
    }
}
