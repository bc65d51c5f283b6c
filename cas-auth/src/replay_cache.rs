//! Replay detection for delegated assertions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use sha2::{Digest, Sha256};

/// Records assertion ids that have already been accepted.
///
/// # Atomicity
///
/// `check_and_insert` **MUST be atomic**: two concurrent calls with the same
/// id must not both return `true`.
pub trait ReplayCache: Send + Sync {
    /// Returns `true` if `(issuer, assertion_id)` was new and is now recorded,
    /// `false` on replay. `expires_at` is the assertion's own expiry (Unix
    /// seconds); entries need not outlive it.
    fn check_and_insert(&self, issuer: &str, assertion_id: &str, expires_at: i64) -> bool;
}

/// LRU + TTL replay cache backed by DashMap.
///
/// - Memory-bounded via `max_entries`
/// - Approximate LRU eviction when at capacity
/// - Periodic cleanup of expired entries every 1000 inserts
pub struct LruReplayCache {
    /// SHA-256 of (issuer, assertion id) -> first seen
    cache: DashMap<[u8; 32], Instant>,
    /// Must be at least the longest assertion lifetime plus skew.
    ttl: Duration,
    max_entries: usize,
    insert_counter: AtomicU64,
}

impl LruReplayCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            cache: DashMap::with_capacity(max_entries / 4),
            ttl,
            max_entries,
            insert_counter: AtomicU64::new(0),
        }
    }

    /// Remove expired entries. Not required for correctness.
    pub fn cleanup_expired(&self) {
        let now = Instant::now();
        self.cache.retain(|_, v| now.duration_since(*v) < self.ttl);
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn key(issuer: &str, assertion_id: &str) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(issuer.as_bytes());
        hasher.update([0u8]);
        hasher.update(assertion_id.as_bytes());
        hasher.finalize().into()
    }
}

impl<T: ReplayCache + ?Sized> ReplayCache for Arc<T> {
    fn check_and_insert(&self, issuer: &str, assertion_id: &str, expires_at: i64) -> bool {
        (**self).check_and_insert(issuer, assertion_id, expires_at)
    }
}

impl ReplayCache for LruReplayCache {
    fn check_and_insert(&self, issuer: &str, assertion_id: &str, _expires_at: i64) -> bool {
        let key = Self::key(issuer, assertion_id);
        let now = Instant::now();

        // Entry API holds the shard lock across check and insert.
        let result = match self.cache.entry(key) {
            Entry::Occupied(entry) => {
                if now.duration_since(*entry.get()) < self.ttl {
                    false
                } else {
                    entry.replace_entry(now);
                    true
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        };

        // Cleanup and eviction after the entry lock is released
        if result {
            let count = self.insert_counter.fetch_add(1, Ordering::Relaxed);
            if count % 1000 == 0 {
                self.cleanup_expired();
            }

            if self.cache.len() >= self.max_entries {
                let key_to_remove = self
                    .cache
                    .iter()
                    .find(|entry| *entry.key() != key)
                    .map(|entry| *entry.key());
                if let Some(k) = key_to_remove {
                    self.cache.remove(&k);
                }
            }
        }

        result
    }
}
