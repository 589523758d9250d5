//! In-memory response cache with TTL expiry.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::cache::policy::{cache_key, cacheable_lifetime};
use crate::http::Message;
use crate::observability::metrics;

/// A stored response and the instant it stops being fresh.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub response: Message,
    pub expires_at: Instant,
}

/// Maps `METHOD:URI` to a previously seen response.
///
/// There is no capacity bound and no background eviction: entries leave
/// only when a lookup finds them expired or a newer store overwrites them.
#[derive(Debug, Default)]
pub struct ResponseCache {
    entries: HashMap<String, CacheEntry>,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh cached response for `request`, if any.
    pub fn lookup(&mut self, request: &Message) -> Option<&Message> {
        self.lookup_at(request, Instant::now())
    }

    /// Same as [`lookup`](Self::lookup) with an explicit clock reading.
    /// An expired entry is removed and reported as a miss.
    pub fn lookup_at(&mut self, request: &Message, now: Instant) -> Option<&Message> {
        let key = cache_key(request);

        let fresh = match self.entries.get(&key) {
            Some(entry) => entry.expires_at > now,
            None => {
                metrics::record_cache_lookup(false);
                return None;
            }
        };

        if !fresh {
            self.entries.remove(&key);
            tracing::debug!(key = %key, "Cache entry expired");
            metrics::record_cache_lookup(false);
            return None;
        }

        metrics::record_cache_lookup(true);
        self.entries.get(&key).map(|entry| &entry.response)
    }

    /// Remember `response` for `request` if the exchange is cacheable.
    /// Returns whether an entry was written.
    pub fn store(&mut self, request: &Message, response: Message) -> bool {
        self.store_at(request, response, Instant::now())
    }

    pub fn store_at(&mut self, request: &Message, response: Message, now: Instant) -> bool {
        let Some(lifetime) = cacheable_lifetime(request, &response) else {
            return false;
        };

        let key = cache_key(request);
        tracing::debug!(key = %key, max_age_secs = lifetime, "Caching response");
        self.entries.insert(
            key,
            CacheEntry {
                response,
                expires_at: now + Duration::from_secs(lifetime),
            },
        );
        metrics::record_cache_store();
        true
    }

    /// Number of stored entries, expired ones included until looked up.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
