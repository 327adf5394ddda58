//! Randomization utilities

use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;

/// Generate random jitter within a range
pub fn jitter(base_secs: u64, max_jitter_secs: u64) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter: u64 = rng.gen_range(0..=max_jitter_secs);
    Duration::from_secs(base_secs + jitter)
}

/// Exponential backoff with jitter
pub fn backoff(attempt: u32, base_secs: u64, max_secs: u64) -> Duration {
    let exp = base_secs.saturating_mul(2_u64.pow(attempt.min(10)));
    let capped = exp.min(max_secs);
    jitter(capped, capped / 4)
}

/// Politeness delay, uniformly drawn from `[min_ms, max_ms]`
pub fn delay_between(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(min_ms..=max_ms))
}

/// Pick one element at random
pub fn choose<T>(items: &[T]) -> Option<&T> {
    items.choose(&mut rand::thread_rng())
}

/// Random alphanumeric token
pub fn token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}
