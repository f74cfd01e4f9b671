//! In-memory bundle cache.
//!
//! Readers clone an `Arc<Bundle>` out of the map, so a published bundle is
//! either fully visible or not visible at all.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use common::{Bundle, CycleKey, RefreshCycle};
use dashmap::DashMap;
use tracing::debug;

/// A published bundle with the cycle it was built for.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub cycle: RefreshCycle,
    pub bundle: Arc<Bundle>,
    pub published_at: DateTime<Utc>,
}

/// Process-lifetime cache keyed by cycle. Holds the newest entry only.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    entries: Arc<DashMap<CycleKey, CacheEntry>>,
}

impl CacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for `cycle` and evict every older key.
    pub fn publish(&self, cycle: RefreshCycle, bundle: Arc<Bundle>, published_at: DateTime<Utc>) {
        let key = cycle.key;
        self.entries.insert(
            key,
            CacheEntry {
                cycle,
                bundle,
                published_at,
            },
        );

        let newest = self.newest_key().unwrap_or(key);
        self.entries.retain(|k, _| *k >= newest);
        debug!("Published bundle for cycle {} ({} entries)", key, self.entries.len());
    }

    pub fn read(&self, key: &CycleKey) -> Option<CacheEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// The entry with the newest cycle key.
    pub fn latest(&self) -> Option<CacheEntry> {
        let key = self.newest_key()?;
        self.read(&key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn newest_key(&self) -> Option<CycleKey> {
        self.entries.iter().map(|entry| *entry.key()).max()
    }
}
