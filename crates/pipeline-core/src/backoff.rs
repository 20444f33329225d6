//! Jittered backoff helpers used by the poll loop and by transient-error retries.

use std::time::Duration;

use rand::Rng;

/// Sleep `base ± jitter_frac` (default callers use 25%). Used when the queue returns no
/// messages so many workers polling the same queue don't thunder in lockstep.
pub async fn sleep_with_jitter(base: Duration, jitter_frac: f64) {
    tokio::time::sleep(jittered(base, jitter_frac)).await;
}

pub fn jittered(base: Duration, jitter_frac: f64) -> Duration {
    let jitter_frac = jitter_frac.clamp(0.0, 1.0);
    let factor = 1.0 + rand::thread_rng().gen_range(-jitter_frac..=jitter_frac);
    Duration::from_secs_f64((base.as_secs_f64() * factor).max(0.0))
}

/// Exponential backoff with jitter for transient retries, bounded at `max_attempts`.
pub struct ExponentialBackoff {
    attempt: u32,
    base: Duration,
    max: Duration,
    max_attempts: u32,
}

impl ExponentialBackoff {
    pub fn new(base: Duration, max: Duration, max_attempts: u32) -> Self {
        Self { attempt: 0, base, max, max_attempts }
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Returns the delay for the next attempt, or `None` if attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts_exhausted() {
            return None;
        }
        let exp = 2_u32.saturating_pow(self.attempt).min(1 << 16);
        let delay = (self.base * exp).min(self.max);
        self.attempt += 1;
        Some(jittered(delay, 0.25))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(4);
        for _ in 0..50 {
            let d = jittered(base, 0.25);
            assert!(d.as_secs_f64() >= 3.0 && d.as_secs_f64() <= 5.0);
        }
    }

    #[test]
    fn backoff_exhausts_after_max_attempts() {
        let mut backoff = ExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(5), 3);
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_none());
        assert!(backoff.attempts_exhausted());
    }
}
