//! Expiration policies for tickets.
//!
//! A policy combines up to three independent limits:
//!
//! - `time_to_live_secs`: hard lifetime measured from creation
//! - `time_to_idle_secs`: maximum gap since the ticket was last used
//! - `max_uses`: number of times the ticket may be used
//!
//! Every limit is a closed boundary: a ticket whose age equals its time to live
//! is already expired. Policies are copied into each ticket when it is issued,
//! so replacing the global [`ExpirationPolicies`] never changes the remaining
//! lifetime of tickets that already exist.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::ticket::TicketKind;

/// Expiration rules attached to a single ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpirationPolicy {
    /// Hard lifetime in seconds, from creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_live_secs: Option<u64>,
    /// Maximum idle time in seconds, from the last use.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_idle_secs: Option<u64>,
    /// Maximum number of uses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_uses: Option<u32>,
}

impl ExpirationPolicy {
    /// A policy that never expires the ticket.
    pub fn never() -> Self {
        Self {
            time_to_live_secs: None,
            time_to_idle_secs: None,
            max_uses: None,
        }
    }

    /// Hard timeout plus idle timeout, unlimited uses.
    pub fn timeout(time_to_live_secs: u64, time_to_idle_secs: u64) -> Self {
        Self {
            time_to_live_secs: Some(time_to_live_secs),
            time_to_idle_secs: Some(time_to_idle_secs),
            max_uses: None,
        }
    }

    /// Expires after `max_uses` uses or `time_to_live_secs`, whichever comes first.
    pub fn multi_use_or_timeout(max_uses: u32, time_to_live_secs: u64) -> Self {
        Self {
            time_to_live_secs: Some(time_to_live_secs),
            time_to_idle_secs: None,
            max_uses: Some(max_uses),
        }
    }

    /// Descriptive name, reported by session introspection.
    pub fn name(&self) -> &'static str {
        match (
            self.time_to_live_secs,
            self.time_to_idle_secs,
            self.max_uses,
        ) {
            (None, None, None) => "never-expires",
            (_, _, Some(_)) => "multi-use-or-timeout",
            (Some(_), None, None) => "hard-timeout",
            (None, Some(_), None) => "idle-timeout",
            (Some(_), Some(_), None) => "timeout",
        }
    }

    /// Check whether a ticket with the given usage is expired at `now`.
    pub fn is_expired(
        &self,
        created_at: DateTime<Utc>,
        last_used_at: DateTime<Utc>,
        count_of_uses: u32,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(max_uses) = self.max_uses {
            if count_of_uses >= max_uses {
                return true;
            }
        }
        if let Some(deadline) = self.hard_deadline(created_at) {
            if now >= deadline {
                return true;
            }
        }
        if let Some(idle_deadline) = self
            .time_to_idle_secs
            .and_then(|tti| add_seconds(last_used_at, tti))
        {
            if now >= idle_deadline {
                return true;
            }
        }
        false
    }

    /// Returns true when another use is still permitted by `max_uses`.
    pub fn allows_use(&self, count_of_uses: u32) -> bool {
        self.max_uses.map_or(true, |max| count_of_uses < max)
    }

    /// Latest instant at which the ticket can still be valid, ignoring idle time.
    pub fn hard_deadline(&self, created_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.time_to_live_secs
            .and_then(|ttl| add_seconds(created_at, ttl))
    }
}

/// `from + secs`, or `None` when the result is beyond the representable range
/// (such a deadline is never reached).
fn add_seconds(from: DateTime<Utc>, secs: u64) -> Option<DateTime<Utc>> {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX / 1000);
    Duration::try_seconds(secs).and_then(|d| from.checked_add_signed(d))
}

/// The policy set applied to newly issued tickets, one per ticket kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpirationPolicies {
    pub ticket_granting: ExpirationPolicy,
    pub service: ExpirationPolicy,
    pub proxy_granting: ExpirationPolicy,
    pub proxy: ExpirationPolicy,
}

impl ExpirationPolicies {
    /// Policy for tickets of `kind`.
    pub fn for_kind(&self, kind: TicketKind) -> &ExpirationPolicy {
        match kind {
            TicketKind::TicketGranting => &self.ticket_granting,
            TicketKind::Service => &self.service,
            TicketKind::ProxyGranting => &self.proxy_granting,
            TicketKind::Proxy => &self.proxy,
        }
    }
}

impl Default for ExpirationPolicies {
    /// 8 hour sessions with a 2 hour idle limit; single-use service and proxy
    /// tickets valid for 10 seconds.
    fn default() -> Self {
        Self {
            ticket_granting: ExpirationPolicy::timeout(28_800, 7_200),
            service: ExpirationPolicy::multi_use_or_timeout(1, 10),
            proxy_granting: ExpirationPolicy::timeout(28_800, 7_200),
            proxy: ExpirationPolicy::multi_use_or_timeout(1, 10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-01-15T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn ttl_boundary_is_expired() {
        let policy = ExpirationPolicy::timeout(60, 3600);
        let created = t0();
        assert!(!policy.is_expired(created, created, 0, created + Duration::seconds(59)));
        assert!(policy.is_expired(created, created, 0, created + Duration::seconds(60)));
        assert!(policy.is_expired(created, created, 0, created + Duration::seconds(61)));
    }

    #[test]
    fn idle_time_counts_from_last_use() {
        let policy = ExpirationPolicy::timeout(3600, 10);
        let created = t0();
        let last_used = created + Duration::seconds(100);
        assert!(!policy.is_expired(created, last_used, 3, last_used + Duration::seconds(9)));
        assert!(policy.is_expired(created, last_used, 3, last_used + Duration::seconds(10)));
    }

    #[test]
    fn max_uses_expires_ticket() {
        let policy = ExpirationPolicy::multi_use_or_timeout(2, 60);
        let created = t0();
        assert!(!policy.is_expired(created, created, 1, created));
        assert!(policy.is_expired(created, created, 2, created));
        assert!(policy.allows_use(1));
        assert!(!policy.allows_use(2));
    }

    #[test]
    fn never_expires() {
        let policy = ExpirationPolicy::never();
        let created = t0();
        assert!(!policy.is_expired(created, created, u32::MAX, created + Duration::days(3650)));
        assert_eq!(policy.name(), "never-expires");
        assert_eq!(policy.hard_deadline(created), None);
    }

    #[test]
    fn defaults_match_cas() {
        let policies = ExpirationPolicies::default();
        assert_eq!(policies.for_kind(TicketKind::TicketGranting).time_to_live_secs, Some(28_800));
        assert_eq!(policies.for_kind(TicketKind::Service).max_uses, Some(1));
        assert_eq!(policies.for_kind(TicketKind::Proxy).time_to_live_secs, Some(10));
        assert_eq!(policies.service.name(), "multi-use-or-timeout");
        assert_eq!(policies.ticket_granting.name(), "timeout");
    }

    #[test]
    fn huge_ttl_does_not_overflow() {
        let policy = ExpirationPolicy::timeout(u64::MAX, u64::MAX);
        assert!(!policy.is_expired(t0(), t0(), 0, t0()));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let policies: ExpirationPolicies =
            serde_json::from_str(r#"{"service":{"time_to_live_secs":30,"max_uses":3}}"#).unwrap();
        assert_eq!(policies.service.max_uses, Some(3));
        assert_eq!(policies.ticket_granting, ExpirationPolicy::timeout(28_800, 7_200));
    }
}
