use super::endpoint::EndpointKind;
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub endpoint: EndpointKind,
    pub body: String,
    pub fetched_at: Instant,
}

/// Raw response bodies keyed by endpoint, valid for `ttl` after they were fetched.
///
/// The clock is passed in by the caller so staleness can be checked against any instant.
#[derive(Debug)]
pub struct ResponseCache {
    ttl: Duration,
    entries: HashMap<EndpointKind, CachedResponse>,
}

impl ResponseCache {
    pub fn new(ttl: Duration) -> Self {
        ResponseCache {
            ttl,
            entries: HashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn set_ttl(&mut self, ttl: Duration) {
        self.ttl = ttl;
    }

    fn is_fresh(&self, entry: &CachedResponse, now: Instant) -> bool {
        now.saturating_duration_since(entry.fetched_at) < self.ttl
    }

    /// Fresh body for `endpoint`, `None` if missing or expired.
    pub fn get(&self, endpoint: EndpointKind, now: Instant) -> Option<&str> {
        self.entries
            .get(&endpoint)
            .filter(|entry| self.is_fresh(entry, now))
            .map(|entry| entry.body.as_str())
    }

    pub fn insert(&mut self, endpoint: EndpointKind, body: String, now: Instant) {
        self.entries.insert(
            endpoint,
            CachedResponse {
                endpoint,
                body,
                fetched_at: now,
            },
        );
    }

    /// Drop expired entries. Returns how many were removed.
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        let ttl = self.ttl;
        self.entries
            .retain(|_, entry| now.saturating_duration_since(entry.fetched_at) < ttl);
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
