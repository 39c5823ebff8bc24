// SPDX-License-Identifier: MIT OR Apache-2.0
//! Pure backoff scheduling, isolated from the worker loop so it can be
//! benched and tested without a database.

use backon::{BackoffBuilder, ExponentialBuilder};
use std::time::Duration;

/// Default retry cap: ~24h of exponential backoff from a 30s floor.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

fn builder() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_secs(30))
        .with_max_delay(Duration::from_secs(2 * 3600))
        .with_factor(2.0)
        .with_max_times(DEFAULT_MAX_ATTEMPTS as usize)
        .with_jitter()
}

/// The delay to schedule before the `attempt`-th retry (0-indexed: the
/// delay before the *first* retry, after the initial attempt failed).
/// Returns `None` once `attempt` exceeds the configured retry cap, meaning
/// the caller should mark the task `failed_fatal` instead of rescheduling.
#[must_use]
pub fn next_delay(attempt: u32) -> Option<Duration> {
    builder().build().nth(attempt as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_delay_is_at_least_the_floor() {
        let delay = next_delay(0).expect("first retry must be scheduled");
        assert!(delay >= Duration::from_secs(30));
    }

    #[test]
    fn delay_eventually_exceeds_the_retry_cap() {
        assert!(next_delay(DEFAULT_MAX_ATTEMPTS).is_none());
    }

    #[test]
    fn delays_never_exceed_the_configured_ceiling() {
        for attempt in 0..DEFAULT_MAX_ATTEMPTS {
            if let Some(delay) = next_delay(attempt) {
                assert!(delay <= Duration::from_secs(2 * 3600));
            }
        }
    }
}
