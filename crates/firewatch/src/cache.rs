//! Time-bounded cache of assembled results, keyed by region-set fingerprint.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::types::AggregateResult;

/// Fingerprint of a requested region set: sorted, de-duplicated ids joined
/// with commas. Order and repetition in the request do not matter.
pub fn fingerprint<S: AsRef<str>>(region_ids: &[S]) -> String {
    let mut ids: Vec<&str> = region_ids.iter().map(|id| id.as_ref()).collect();
    ids.sort_unstable();
    ids.dedup();
    ids.join(",")
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub value: AggregateResult,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Concurrent cache with at most one entry per fingerprint.
///
/// Entries are replaced whole, so a reader sees either the old value or the
/// new one. Expired entries read as a miss and are dropped on access.
#[derive(Debug, Default)]
pub struct ForecastCache {
    entries: DashMap<String, CacheEntry>,
}

impl ForecastCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, fingerprint: &str) -> Option<AggregateResult> {
        self.get_at(fingerprint, Utc::now())
    }

    pub fn get_at(&self, fingerprint: &str, now: DateTime<Utc>) -> Option<AggregateResult> {
        if let Some(entry) = self.entries.get(fingerprint)
            && !entry.is_expired(now)
        {
            return Some(entry.value.clone());
        }

        // The read guard is released above; remove_if locks the shard itself.
        if self
            .entries
            .remove_if(fingerprint, |_, entry| entry.is_expired(now))
            .is_some()
        {
            log::debug!("Cache entry {fingerprint} expired");
        }
        None
    }

    pub fn put(&self, fingerprint: &str, value: AggregateResult, ttl: Duration) {
        self.put_at(fingerprint, value, ttl, Utc::now());
    }

    pub fn put_at(
        &self,
        fingerprint: &str,
        value: AggregateResult,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        let entry = CacheEntry {
            fingerprint: fingerprint.to_string(),
            value,
            expires_at: now + ttl,
        };
        self.entries.insert(fingerprint.to_string(), entry);
    }

    pub fn invalidate(&self, fingerprint: &str) -> bool {
        self.entries.remove(fingerprint).is_some()
    }

    /// Drops every entry, returning how many were removed.
    pub fn invalidate_all(&self) -> usize {
        let count = self.entries.len();
        self.entries.clear();
        log::info!("Cleared {count} cache entries");
        count
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
