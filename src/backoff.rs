//! Retry-delay computation: capped exponential backoff with jitter.

use std::time::Duration;

/// Exponent is saturated here to keep the doubling well inside f64 range.
const MAX_EXPONENT: u32 = 20;

/// Hard ceiling on the un-jittered delay.
const MAX_DELAY_SECONDS: f64 = 3600.0;

/// Multiplicative jitter applied symmetrically around the exponential delay.
const JITTER_RATIO: f64 = 0.25;

/// Compute the delay before attempt `attempt` (1-based) becomes eligible.
///
/// `base_seconds * 2^(attempt-1)`, capped at one hour, with uniform ±25%
/// jitter to decorrelate retry storms, and never less than one second.
pub fn compute_backoff(base_seconds: i32, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(MAX_EXPONENT);
    let exponential = f64::from(base_seconds.max(0)) * 2f64.powi(exponent as i32);
    let capped = exponential.min(MAX_DELAY_SECONDS);

    let jitter = (fastrand::f64() * 2.0 - 1.0) * JITTER_RATIO;
    let delay = capped * (1.0 + jitter);

    Duration::from_secs_f64(delay.max(1.0))
}
