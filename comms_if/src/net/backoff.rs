//! # Backoff
//!
//! Exponential back off used when a socket keeps failing.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::time::Duration;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Exponential back off between failed attempts.
#[derive(Debug, Clone)]
pub struct Backoff {
    min: Duration,
    max: Duration,
    current: Option<Duration>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Backoff {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
            current: None,
        }
    }

    /// Delay to wait after another failure.
    pub fn next_delay(&mut self) -> Duration {
        let delay = match self.current {
            Some(d) => (d * 2).min(self.max),
            None => self.min,
        };
        self.current = Some(delay);
        delay
    }

    /// True if the last attempt failed.
    pub fn is_backing_off(&self) -> bool {
        self.current.is_some()
    }

    pub fn reset(&mut self) {
        self.current = None;
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_backoff() {
        let mut backoff = Backoff::new(Duration::from_millis(250), Duration::from_millis(1000));

        assert!(!backoff.is_backing_off());
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert_eq!(backoff.next_delay(), Duration::from_millis(1000));
        assert!(backoff.is_backing_off());

        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_backoff_max_below_min() {
        let mut backoff = Backoff::new(Duration::from_millis(500), Duration::from_millis(100));

        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
        assert_eq!(backoff.next_delay(), Duration::from_millis(500));
    }
}
