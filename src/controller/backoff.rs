//! # Exponential Backoff
//!
//! Retry delay for failed sync cycles.
//!
//! The delay doubles after every consecutive failure, starting at `start_ms`
//! and capped at `max_ms`. A successful sync resets it.
//!
//! ## Usage
//!
//! ```rust
//! use nodeport_proxy::controller::backoff::ExponentialBackoff;
//! use std::time::Duration;
//!
//! let mut backoff = ExponentialBackoff::new(5, 1_000);
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(10));
//! assert_eq!(backoff.next_backoff(), Duration::from_millis(20));
//! ```

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    start_ms: u64,
    max_ms: u64,
    /// Consecutive failures since the last reset
    failures: u32,
}

impl ExponentialBackoff {
    /// Create a backoff starting at `start_ms` and never exceeding `max_ms`
    #[must_use]
    pub fn new(start_ms: u64, max_ms: u64) -> Self {
        Self {
            start_ms: start_ms.max(1),
            max_ms: max_ms.max(start_ms),
            failures: 0,
        }
    }

    /// Get the next delay in milliseconds and advance the sequence
    pub fn next_backoff_ms(&mut self) -> u64 {
        let delay = 2u64
            .checked_pow(self.failures)
            .and_then(|factor| self.start_ms.checked_mul(factor))
            .map_or(self.max_ms, |delay| delay.min(self.max_ms));
        self.failures = self.failures.saturating_add(1);
        delay
    }

    /// Get the next delay as a `Duration` and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_millis(self.next_backoff_ms())
    }

    /// Number of failures recorded since the last reset
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Reset to the starting delay
    pub fn reset(&mut self) {
        self.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(5, 1_000_000);

        assert_eq!(backoff.next_backoff_ms(), 5);
        assert_eq!(backoff.next_backoff_ms(), 10);
        assert_eq!(backoff.next_backoff_ms(), 20);
        assert_eq!(backoff.next_backoff_ms(), 40);
        assert_eq!(backoff.failures(), 4);
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let mut backoff = ExponentialBackoff::new(100, 500);

        assert_eq!(backoff.next_backoff_ms(), 100);
        assert_eq!(backoff.next_backoff_ms(), 200);
        assert_eq!(backoff.next_backoff_ms(), 400);
        assert_eq!(backoff.next_backoff_ms(), 500);
        assert_eq!(backoff.next_backoff_ms(), 500);
    }

    #[test]
    fn test_exponential_backoff_does_not_overflow() {
        let mut backoff = ExponentialBackoff::new(5, 1_000_000);
        for _ in 0..200 {
            assert!(backoff.next_backoff_ms() <= 1_000_000);
        }
        assert_eq!(backoff.next_backoff_ms(), 1_000_000);
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(5, 1_000);
        backoff.next_backoff_ms();
        backoff.next_backoff_ms();
        backoff.next_backoff_ms();

        backoff.reset();

        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.next_backoff(), Duration::from_millis(5));
    }
}
