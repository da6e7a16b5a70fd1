//! Exponential backoff delay calculation with jitter.
//!
//! Pure functions shared by the retry executor (sleep between synchronous
//! attempts) and the queue processor (rescheduling failed items). Jitter
//! spreads retries from many failing consumers so they do not land on a
//! recovering endpoint at the same instant.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Jitter settings for backoff randomization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Jitter {
    /// Whether to randomize computed delays.
    pub enabled: bool,
    /// Fraction of the delay used as the total jitter window.
    ///
    /// A factor of 0.5 turns a 10s delay into 7.5s..12.5s.
    pub factor: f64,
}

impl Jitter {
    /// Disables jitter entirely, for deterministic delays.
    pub fn disabled() -> Self {
        Self { enabled: false, factor: 0.0 }
    }
}

impl Default for Jitter {
    fn default() -> Self {
        Self { enabled: true, factor: 0.25 }
    }
}

/// Computes the delay before the retry with the given attempt exponent.
///
/// `base * multiplier^attempt`, clamped to `max`, then jittered by a
/// uniform offset in `[-d*factor/2, +d*factor/2]` and clamped to zero.
/// With jitter disabled the result is exactly `min(base * multiplier^attempt, max)`.
pub fn delay_for_attempt(
    attempt: u32,
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter: Jitter,
) -> Duration {
    delay_for_attempt_with_rng(attempt, base, max, multiplier, jitter, &mut rand::rng())
}

/// Backoff delay using a caller-supplied RNG for seeded determinism.
pub fn delay_for_attempt_with_rng<R: Rng>(
    attempt: u32,
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter: Jitter,
    rng: &mut R,
) -> Duration {
    let max_secs = max.as_secs_f64();
    let raw = base.as_secs_f64() * multiplier.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let capped = if raw.is_finite() { raw.min(max_secs) } else { max_secs };

    if !jitter.enabled || jitter.factor <= 0.0 || capped <= 0.0 {
        return Duration::from_secs_f64(capped);
    }

    let half_window = capped * jitter.factor.clamp(0.0, 1.0) / 2.0;
    let offset = rng.random_range(-half_window..=half_window);

    Duration::from_secs_f64((capped + offset).max(0.0))
}
