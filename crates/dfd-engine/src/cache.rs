//! Bounded, TTL-limited result cache keyed by [`Fingerprint`].
//!
//! Eviction is lazy: expired entries are dropped when they are looked up
//! and on insert, and an insert into a full cache removes the oldest entry
//! after the expired ones.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use dfd_models::DetectionResult;
use tokio::time::Instant;
use tracing::debug;

use crate::fingerprint::Fingerprint;

#[derive(Clone)]
struct CachedResult {
    result: DetectionResult,
    cached_at: Instant,
}

/// Completed verdicts keyed by file fingerprint.
///
/// Holds at most `max_entries` results, each for at most `max_age`.
pub struct ResultCache {
    entries: RwLock<HashMap<Fingerprint, CachedResult>>,
    max_entries: usize,
    max_age: Duration,
}

impl ResultCache {
    /// A zero `max_entries` is treated as one.
    pub fn new(max_entries: usize, max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries: max_entries.max(1),
            max_age,
        }
    }

    /// Cached result for `key`, if present and fresh.
    pub fn get(&self, key: &Fingerprint) -> Option<DetectionResult> {
        let now = Instant::now();
        {
            let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
            match entries.get(key) {
                Some(cached) if now.duration_since(cached.cached_at) < self.max_age => {
                    return Some(cached.result.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        // Expired; drop it unless another writer refreshed it meanwhile
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(cached) = entries.get(key) {
            if now.duration_since(cached.cached_at) >= self.max_age {
                entries.remove(key);
                debug!(key = %key, "Expired cache entry removed");
            }
        }
        None
    }

    /// Store `result`, replacing any entry for `key`. A full cache first
    /// drops expired entries, then the oldest one.
    pub fn put(&self, key: Fingerprint, result: DetectionResult) {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        if !entries.contains_key(&key) && entries.len() >= self.max_entries {
            entries.retain(|_, cached| now.duration_since(cached.cached_at) < self.max_age);

            if entries.len() >= self.max_entries {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, cached)| cached.cached_at)
                    .map(|(k, _)| k.clone());
                if let Some(oldest) = oldest {
                    debug!(key = %oldest, "Evicting oldest cache entry");
                    entries.remove(&oldest);
                }
            }
        }

        entries.insert(
            key,
            CachedResult {
                result,
                cached_at: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|e| e.into_inner()).clear();
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|_, cached| now.duration_since(cached.cached_at) < self.max_age);
        before - entries.len()
    }
}
