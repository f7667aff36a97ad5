//! Retry policy for transient batch-write failures.

use std::time::Duration;

/// Error-message fragments treated as transient. Anything else fails the
/// batch immediately.
const TRANSIENT_MARKERS: &[&str] = &["Lock wait timeout", "Deadlock found", "Connection reset"];

/// Fixed retry policy: bounded attempts with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Backoff base; attempt `n` (0-based) waits `base^n` seconds
    pub backoff_base_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_secs: 2,
        }
    }
}

impl RetryPolicy {
    /// True when the error message indicates a transient condition worth
    /// retrying.
    pub fn is_transient(&self, message: &str) -> bool {
        TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
    }

    /// Backoff before the retry following 0-based `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.backoff_base_secs.saturating_pow(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_markers() {
        let policy = RetryPolicy::default();
        assert!(policy.is_transient("Lock wait timeout exceeded; try restarting transaction"));
        assert!(policy.is_transient("Deadlock found when trying to get lock"));
        assert!(policy.is_transient("Connection reset by peer"));
        assert!(!policy.is_transient("duplicate key value violates unique constraint"));
        assert!(!policy.is_transient("syntax error at or near"));
    }

    #[test]
    fn test_backoff_is_strictly_increasing() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert!(policy.backoff(1) > policy.backoff(0));
    }
}
