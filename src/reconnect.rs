//! Reconnect policy and jittered backoff.
//!
//! When a connection attempt fails, or a live connection is closed by the
//! broker, the client waits a random delay drawn uniformly from
//! `[0, max_jitter)` before dialing again. The random spread keeps many
//! client instances from reconnecting in lockstep after a broker restart.
//!
//! By default reconnection is retried forever. A finite `max_attempts` turns
//! the loop into a bounded one that eventually surfaces
//! [`Error::ReconnectExhausted`](crate::Error::ReconnectExhausted).

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::BuildHasher;
use std::time::Duration;

/// Identifier correlating one reconnect sequence across its events.
///
/// Wraps the Unix timestamp (milliseconds) at which the sequence began.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RetryToken(i64);

impl RetryToken {
    // ---

    /// Token for a sequence starting now.
    pub fn now() -> Self {
        // ---
        Self(chrono::Utc::now().timestamp_millis())
    }

    /// Token with an explicit value.
    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Raw millisecond value.
    pub fn as_millis(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for RetryToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reconnect configuration.
///
/// Configure through
/// [`BrokerClientBuilder::reconnect_policy()`](crate::BrokerClientBuilder::reconnect_policy).
///
/// # Example
///
/// ```
/// use mom_client::ReconnectPolicy;
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy {
///     max_jitter: Duration::from_millis(500),
///     max_attempts: Some(10),
/// };
/// assert!(policy.allows_retry(10));
/// assert!(!policy.allows_retry(11));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Upper bound (exclusive) of the random delay before each reconnect.
    ///
    /// Zero disables the delay entirely.
    pub max_jitter: Duration,

    /// Maximum number of consecutive failed dials tolerated before giving up.
    ///
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    /// Retry forever with a delay drawn from `[0, 3s)`.
    fn default() -> Self {
        // ---
        Self {
            max_jitter: Duration::from_millis(3000),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    // ---

    /// Retry forever without any delay. Mostly useful in tests.
    pub fn immediate() -> Self {
        Self {
            max_jitter: Duration::ZERO,
            max_attempts: None,
        }
    }

    /// Whether another dial may follow `failures` consecutive failures.
    pub fn allows_retry(&self, failures: u32) -> bool {
        // ---
        match self.max_attempts {
            Some(max) => failures <= max,
            None => true,
        }
    }

    /// Draw the delay for the next reconnect.
    pub fn next_delay(&self) -> Duration {
        uniform_jitter(self.max_jitter)
    }
}

/// Uniform delay in `[0, max)`.
///
/// Uses the randomly keyed std hasher as the entropy source, so no RNG
/// dependency is needed for a value that only has to spread clients apart.
fn uniform_jitter(max: Duration) -> Duration {
    // ---
    let bound = u64::try_from(max.as_nanos()).unwrap_or(u64::MAX);
    if bound == 0 {
        return Duration::ZERO;
    }

    let random_state = RandomState::new();
    let hash = random_state.hash_one(std::time::SystemTime::now());

    Duration::from_nanos(hash % bound)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn test_default_policy_retries_forever() {
        // ---
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.max_jitter, Duration::from_millis(3000));
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(u32::MAX));
    }

    #[test]
    fn test_bounded_policy() {
        // ---
        let policy = ReconnectPolicy {
            max_jitter: Duration::from_millis(10),
            max_attempts: Some(2),
        };

        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        // ---
        let policy = ReconnectPolicy {
            max_jitter: Duration::ZERO,
            max_attempts: Some(0),
        };
        assert!(!policy.allows_retry(1));
    }

    #[test]
    fn test_jitter_range() {
        // ---
        let max = Duration::from_millis(3000);

        for _ in 0..200 {
            let delay = uniform_jitter(max);
            assert!(delay < max, "jitter out of range: {delay:?}");
        }
    }

    #[test]
    fn test_zero_jitter() {
        // ---
        assert_eq!(ReconnectPolicy::immediate().next_delay(), Duration::ZERO);
        assert_eq!(uniform_jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_retry_token_display() {
        // ---
        let token = RetryToken::from_millis(1_700_000_000_123);
        assert_eq!(token.to_string(), "1700000000123");
        assert_eq!(token.as_millis(), 1_700_000_000_123);
        assert!(RetryToken::now().as_millis() > 0);
    }
}
