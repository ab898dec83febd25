//! Exponential-backoff generator for connection reconnection attempts
//! (spec §3 `BackoffIterator`, §8 property 7).

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Tunables for the backoff sequence (spec §4.2's reconnection policy).
#[derive(Debug, Clone, Copy)]
pub struct BackoffConfig {
    pub initial_backoff: Duration,
    pub multiplier: f64,
    pub maximum_backoff: Duration,
    /// Fraction applied as uniform jitter in `[-jitter*v, +jitter*v]`.
    pub jitter: f64,
    pub minimum_connection_timeout: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        BackoffConfig {
            initial_backoff: Duration::from_secs_f64(1.0),
            multiplier: 1.6,
            maximum_backoff: Duration::from_secs(120),
            jitter: 0.2,
            minimum_connection_timeout: Duration::from_secs(20),
        }
    }
}

/// A stateful generator yielding `(connect_timeout, backoff_delay)` pairs
/// (spec §3). Produces `initial_backoff` first; subsequently multiplies an
/// unjittered value by `multiplier`, clamps at `maximum_backoff`, and
/// applies uniform jitter to the value it actually emits.
///
/// Stops once the *unjittered* value has reached the clamp, unless
/// `infinite_retries` is set, in which case it keeps yielding the clamped
/// value forever (spec §8 property 7).
#[derive(Debug)]
pub struct BackoffIterator {
    config: BackoffConfig,
    infinite_retries: bool,
    current_unjittered: Duration,
    exhausted: bool,
    rng_state: u64,
}

impl BackoffIterator {
    pub fn new(config: BackoffConfig, infinite_retries: bool) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0x9E3779B97F4A7C15)
            | 1;
        BackoffIterator::with_seed(config, infinite_retries, seed)
    }

    /// Constructs with an explicit PRNG seed, for deterministic tests.
    pub fn with_seed(config: BackoffConfig, infinite_retries: bool, seed: u64) -> Self {
        BackoffIterator {
            current_unjittered: config.initial_backoff,
            config,
            infinite_retries,
            exhausted: false,
            rng_state: seed | 1,
        }
    }

    fn next_uniform(&mut self) -> f64 {
        // xorshift64*, good enough for jitter — this isn't a security boundary.
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        (x >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0
    }

    fn apply_jitter(&mut self, v: Duration) -> Duration {
        if self.config.jitter <= 0.0 {
            return v;
        }
        let r = self.next_uniform();
        let delta = v.as_secs_f64() * self.config.jitter * r;
        Duration::from_secs_f64((v.as_secs_f64() + delta).max(0.0))
    }

    /// Produces the next `(connect_timeout, backoff_delay)` pair, or `None`
    /// once the sequence has stopped.
    pub fn next(&mut self) -> Option<(Duration, Duration)> {
        if self.exhausted {
            return None;
        }

        let unjittered = self.current_unjittered;
        let backoff = self.apply_jitter(unjittered);
        let connect_timeout = backoff.max(self.config.minimum_connection_timeout);

        if unjittered >= self.config.maximum_backoff {
            self.current_unjittered = self.config.maximum_backoff;
            if !self.infinite_retries {
                self.exhausted = true;
            }
        } else {
            let next_secs = unjittered.as_secs_f64() * self.config.multiplier;
            let clamped = next_secs.min(self.config.maximum_backoff.as_secs_f64());
            self.current_unjittered = Duration::from_secs_f64(clamped);
        }

        Some((connect_timeout, backoff))
    }
}

impl Iterator for BackoffIterator {
    type Item = (Duration, Duration);

    fn next(&mut self) -> Option<Self::Item> {
        BackoffIterator::next(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unjittered_config() -> BackoffConfig {
        BackoffConfig {
            initial_backoff: Duration::from_secs_f64(1.0),
            multiplier: 1.6,
            maximum_backoff: Duration::from_secs(120),
            jitter: 0.0,
            minimum_connection_timeout: Duration::from_secs(20),
        }
    }

    #[test]
    fn sequence_matches_spec_scenario_without_jitter() {
        let mut iter = BackoffIterator::with_seed(unjittered_config(), false, 1);
        let values: Vec<f64> = std::iter::from_fn(|| iter.next().map(|(_, b)| b.as_secs_f64()))
            .collect();

        assert!((values[0] - 1.0).abs() < 1e-9);
        assert!((values[1] - 1.6).abs() < 1e-9);
        assert!((values[2] - 2.56).abs() < 1e-9);
        assert!((values[3] - 4.096).abs() < 1e-9);
        assert!((*values.last().unwrap() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn connect_timeout_is_max_of_backoff_and_minimum() {
        let mut iter = BackoffIterator::with_seed(unjittered_config(), false, 1);
        for (connect_timeout, backoff) in std::iter::from_fn(|| iter.next()) {
            assert_eq!(connect_timeout, backoff.max(Duration::from_secs(20)));
        }
    }

    #[test]
    fn stops_after_reaching_the_clamp() {
        let mut iter = BackoffIterator::with_seed(unjittered_config(), false, 1);
        let count = std::iter::from_fn(|| iter.next()).count();
        // ceil(log_1.6(120/1)) + 1
        let expected_max = (120.0_f64 / 1.0).ln() / 1.6_f64.ln();
        assert!(count as f64 <= expected_max.ceil() + 1.0);
        assert!(iter.next().is_none());
    }

    #[test]
    fn infinite_retries_keeps_yielding_the_clamp() {
        let mut iter = BackoffIterator::with_seed(unjittered_config(), true, 1);
        let values: Vec<_> = std::iter::from_fn(|| iter.next()).take(50).collect();
        assert_eq!(values.len(), 50);
        let last_ten: Vec<_> = values[40..].iter().map(|(_, b)| b.as_secs_f64()).collect();
        for v in last_ten {
            assert!((v - 120.0).abs() < 1e-9);
        }
    }

    #[test]
    fn unjittered_value_is_monotonically_non_decreasing_and_bounded() {
        let config = BackoffConfig {
            jitter: 0.0,
            ..unjittered_config()
        };
        let mut iter = BackoffIterator::with_seed(config, false, 7);
        let mut last = 0.0;
        while let Some((_, backoff)) = iter.next() {
            let v = backoff.as_secs_f64();
            assert!(v + 1e-9 >= last);
            assert!(v <= 120.0 + 1e-9);
            last = v;
        }
    }

    #[test]
    fn jitter_keeps_values_within_bounds() {
        let config = BackoffConfig {
            jitter: 0.2,
            ..unjittered_config()
        };
        let mut iter = BackoffIterator::with_seed(config, false, 42);
        // first unjittered value is 1.0s, jitter +/-20% => [0.8, 1.2]
        let (_, backoff) = iter.next().unwrap();
        let v = backoff.as_secs_f64();
        assert!((0.8..=1.2).contains(&v), "v={v}");
    }
}
