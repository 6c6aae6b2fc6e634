//! TTL cache of successful responses.

use crate::response::SoapResponse;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Time source for cache expiry.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(by).unwrap_or(*now);
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock() = at;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    response: SoapResponse,
    stored_at: DateTime<Utc>,
}

/// Response cache owned by one service instance.
///
/// Only successful responses are stored. An entry is served while it is
/// younger than the TTL, measured from the time it was stored.
pub struct ResponseCache {
    entries: DashMap<String, CacheEntry>,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    /// Deterministic key for (url, action, body).
    pub fn cache_key(url: &str, action: &str, body: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        hasher.update(b":");
        hasher.update(action.as_bytes());
        hasher.update(b":");
        hasher.update(body.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Live entry for `key`. Expired entries are evicted on the way.
    pub fn get(&self, key: &str) -> Option<SoapResponse> {
        let now = self.clock.now();
        let ttl = self.ttl;
        let expired = |entry: &CacheEntry| now.signed_duration_since(entry.stored_at) >= ttl;

        if self.entries.remove_if(key, |_, entry| expired(entry)).is_some() {
            debug!(key, "Cache entry expired");
            return None;
        }
        let hit = self.entries.get(key).map(|entry| entry.response.clone());
        debug!(key, hit = hit.is_some(), "Cache lookup");
        hit
    }

    /// Store a successful response. Returns whether it was stored.
    pub fn insert(&self, key: String, response: &SoapResponse) -> bool {
        if !response.is_successful() {
            return false;
        }
        self.entries.insert(
            key,
            CacheEntry {
                response: response.clone(),
                stored_at: self.clock.now(),
            },
        );
        true
    }

    /// Drop every expired entry, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.signed_duration_since(entry.stored_at) < self.ttl);
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
