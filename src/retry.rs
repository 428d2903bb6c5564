//! Backoff strategies for retrying requests the server rejected with 503.
//!
//! Bitrix24 answers `503 Service Unavailable` when a portal is over its
//! request budget. The clients back off using a [`RetryStrategy`] and give up
//! once the configured retry ceiling is reached.

use crate::Error;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;

/// The shape of the backoff curve.
///
/// # Examples
///
/// ```
/// use bitrix24_client::RetryPolicy;
///
/// let policy: RetryPolicy = "exponential_jitter".parse().unwrap();
/// assert_eq!(policy, RetryPolicy::ExponentialJitter);
/// assert!("fibonacci".parse::<RetryPolicy>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Always wait `base`.
    Fixed,
    /// Wait `base * attempt`.
    Linear,
    /// Wait `base * ln(1 + attempt)`.
    Logarithmic,
    /// Wait `base * 2^(attempt - 1)`.
    #[default]
    Exponential,
    /// Wait a uniformly random duration in `[0, base * 2^(attempt - 1)]`.
    ExponentialJitter,
}

impl RetryPolicy {
    /// The canonical configuration name of the policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryPolicy::Fixed => "fixed",
            RetryPolicy::Linear => "linear",
            RetryPolicy::Logarithmic => "logarithmic",
            RetryPolicy::Exponential => "exponential",
            RetryPolicy::ExponentialJitter => "exponential_jitter",
        }
    }
}

impl fmt::Display for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "fixed" => Ok(RetryPolicy::Fixed),
            "linear" => Ok(RetryPolicy::Linear),
            "logarithmic" => Ok(RetryPolicy::Logarithmic),
            "exponential" => Ok(RetryPolicy::Exponential),
            "exponential_jitter" => Ok(RetryPolicy::ExponentialJitter),
            _ => Err(Error::ConfigurationError(format!(
                "Unknown retry policy: '{}'",
                s
            ))),
        }
    }
}

/// A backoff policy together with its base delay and cap.
///
/// Every delay this strategy produces lies in `[0, max_delay]`.
///
/// # Examples
///
/// ```
/// use bitrix24_client::{RetryPolicy, RetryStrategy};
/// use std::time::Duration;
///
/// // 1s, 2s, 4s, 8s, then capped at 10s
/// let strategy = RetryStrategy::new(
///     RetryPolicy::Exponential,
///     Duration::from_secs(1),
///     Duration::from_secs(10),
/// );
/// assert_eq!(strategy.delay(3), Duration::from_secs(4));
/// assert_eq!(strategy.delay(5), Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryStrategy {
    /// The backoff curve.
    pub policy: RetryPolicy,
    /// The delay unit the curve is scaled by.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Default for RetryStrategy {
    fn default() -> Self {
        Self {
            policy: RetryPolicy::Exponential,
            base: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryStrategy {
    /// Creates a strategy from its parts.
    pub fn new(policy: RetryPolicy, base: Duration, max_delay: Duration) -> Self {
        Self {
            policy,
            base,
            max_delay,
        }
    }

    /// Returns the delay before the given retry, drawing jitter from the thread RNG.
    ///
    /// # Arguments
    ///
    /// * `attempt` - The retry number (1 = first retry). `0` is accepted and
    ///   treated like `1` by every policy.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_rng(attempt, &mut rand::thread_rng())
    }

    /// Returns the delay before the given retry, drawing jitter from `rng`.
    ///
    /// Deterministic for every policy except [`RetryPolicy::ExponentialJitter`],
    /// which is deterministic for a seeded `rng`.
    pub fn delay_with_rng<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let base = self.base.as_secs_f64();
        let max = self.max_delay.as_secs_f64();

        let secs = match self.policy {
            RetryPolicy::Fixed => base,
            RetryPolicy::Linear => base * f64::from(attempt.max(1)),
            RetryPolicy::Logarithmic => {
                if attempt == 0 {
                    base
                } else {
                    base * f64::from(attempt).ln_1p()
                }
            }
            RetryPolicy::Exponential => exponential_envelope(base, attempt),
            RetryPolicy::ExponentialJitter => {
                let envelope = clamp_secs(exponential_envelope(base, attempt), max);
                rng.gen_range(0.0..=envelope)
            }
        };

        // `max` can round above `Duration::MAX` for very large caps.
        Duration::try_from_secs_f64(clamp_secs(secs, max))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// `base * 2^(attempt - 1)`, with attempts counted from 1.
fn exponential_envelope(base: f64, attempt: u32) -> f64 {
    let exponent = attempt.max(1) - 1;
    base * 2f64.powi(exponent.min(i32::MAX as u32) as i32)
}

fn clamp_secs(secs: f64, max: f64) -> f64 {
    if secs.is_nan() {
        return max;
    }
    secs.clamp(0.0, max)
}

/// Per-logical-call retry bookkeeping.
///
/// The counter starts at zero for each logical call and never exceeds
/// `max_retries`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryState {
    retries: usize,
    max_retries: usize,
}

impl RetryState {
    pub(crate) fn new(max_retries: usize) -> Self {
        Self {
            retries: 0,
            max_retries,
        }
    }

    /// Physical requests made so far, counting the one in flight.
    pub(crate) fn attempts(&self) -> usize {
        self.retries + 1
    }

    /// Registers a 503 and returns how long to wait before the next attempt.
    ///
    /// Fails with [`Error::MaxRetriesExceeded`] once the ceiling is reached,
    /// without consuming another retry.
    pub(crate) fn next_delay(
        &mut self,
        strategy: &RetryStrategy,
        jitter: &JitterSource,
        url: &str,
    ) -> crate::Result<Duration> {
        if self.retries >= self.max_retries {
            return Err(Error::MaxRetriesExceeded {
                url: url.to_string(),
                attempts: self.attempts(),
            });
        }
        self.retries += 1;
        let attempt = u32::try_from(self.retries).unwrap_or(u32::MAX);
        Ok(jitter.delay(strategy, attempt))
    }
}

/// The randomness used for jittered delays.
///
/// Seeded from entropy by default; a fixed seed makes jitter reproducible.
pub(crate) struct JitterSource {
    rng: Mutex<StdRng>,
}

impl JitterSource {
    pub(crate) fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng: Mutex::new(rng),
        }
    }

    pub(crate) fn delay(&self, strategy: &RetryStrategy, attempt: u32) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        strategy.delay_with_rng(attempt, &mut *rng)
    }
}

impl fmt::Debug for JitterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JitterSource").finish_non_exhaustive()
    }
}
