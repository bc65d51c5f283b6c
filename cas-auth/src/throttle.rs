//! Failed-login throttling per (username, client IP).

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

/// Counts failures in a sliding window and blocks further attempts once
/// `threshold` failures fall inside it.
#[derive(Debug)]
pub struct FailureThrottle {
    failures: DashMap<ThrottleKey, VecDeque<DateTime<Utc>>>,
    threshold: usize,
    window: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ThrottleKey {
    username: String,
    ip: String,
}

impl ThrottleKey {
    /// Usernames are compared case-insensitively.
    pub fn new(username: &str, ip: Option<&str>) -> Self {
        Self {
            username: username.to_lowercase(),
            ip: ip.unwrap_or_default().to_string(),
        }
    }
}

impl FailureThrottle {
    /// A `threshold` of zero disables throttling.
    pub fn new(threshold: usize, window: Duration) -> Self {
        Self {
            failures: DashMap::new(),
            threshold,
            window,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold > 0
    }

    pub fn is_throttled(&self, key: &ThrottleKey, now: DateTime<Utc>) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let window_start = now - self.window;
        self.failures.get(key).is_some_and(|entries| {
            entries.iter().filter(|ts| **ts > window_start).count() >= self.threshold
        })
    }

    pub fn record_failure(&self, key: ThrottleKey, now: DateTime<Utc>) {
        if !self.is_enabled() {
            return;
        }
        let window_start = now - self.window;
        let mut entries = self.failures.entry(key).or_default();
        while entries.front().is_some_and(|ts| *ts <= window_start) {
            entries.pop_front();
        }
        entries.push_back(now);
        // Older entries beyond the threshold never change the outcome.
        while entries.len() > self.threshold {
            entries.pop_front();
        }
    }

    /// Forget failures for one key, after a successful login.
    pub fn clear(&self, key: &ThrottleKey) {
        self.failures.remove(key);
    }

    pub fn clear_all(&self) -> usize {
        let count = self.failures.len();
        self.failures.clear();
        count
    }

    /// Drop keys with no failure inside the window.
    pub fn prune(&self, now: DateTime<Utc>) {
        let window_start = now - self.window;
        self.failures
            .retain(|_, entries| entries.back().is_some_and(|ts| *ts > window_start));
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> ThrottleKey {
        ThrottleKey::new("CasUser", Some("10.0.0.1"))
    }

    #[test]
    fn blocks_after_threshold() {
        let throttle = FailureThrottle::new(3, Duration::seconds(60));
        let now = Utc::now();
        for i in 0..3 {
            assert!(!throttle.is_throttled(&key(), now));
            throttle.record_failure(key(), now + Duration::seconds(i));
        }
        assert!(throttle.is_throttled(&key(), now + Duration::seconds(3)));
    }

    #[test]
    fn username_case_is_ignored_but_ip_is_not() {
        let throttle = FailureThrottle::new(1, Duration::seconds(60));
        let now = Utc::now();
        throttle.record_failure(key(), now);
        assert!(throttle.is_throttled(&ThrottleKey::new("casuser", Some("10.0.0.1")), now));
        assert!(!throttle.is_throttled(&ThrottleKey::new("casuser", Some("10.0.0.2")), now));
    }

    #[test]
    fn window_slides() {
        let throttle = FailureThrottle::new(2, Duration::seconds(10));
        let now = Utc::now();
        throttle.record_failure(key(), now);
        throttle.record_failure(key(), now + Duration::seconds(5));
        assert!(throttle.is_throttled(&key(), now + Duration::seconds(9)));
        assert!(!throttle.is_throttled(&key(), now + Duration::seconds(10)));
    }

    #[test]
    fn clear_resets() {
        let throttle = FailureThrottle::new(1, Duration::seconds(60));
        let now = Utc::now();
        throttle.record_failure(key(), now);
        throttle.record_failure(ThrottleKey::new("other", None), now);
        throttle.clear(&key());
        assert!(!throttle.is_throttled(&key(), now));
        assert_eq!(throttle.clear_all(), 1);
        assert!(throttle.is_empty());
    }

    #[test]
    fn prune_drops_stale_keys() {
        let throttle = FailureThrottle::new(5, Duration::seconds(10));
        let now = Utc::now();
        throttle.record_failure(key(), now);
        throttle.prune(now + Duration::seconds(11));
        assert_eq!(throttle.len(), 0);
    }

    #[test]
    fn zero_threshold_disables() {
        let throttle = FailureThrottle::new(0, Duration::seconds(10));
        let now = Utc::now();
        throttle.record_failure(key(), now);
        assert!(!throttle.is_throttled(&key(), now));
        assert!(throttle.is_empty());
    }
}
