use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone)]
struct LocalEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> LocalEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Process-local TTL cache.
/// Uses DashMap sharded locking; last write for a key wins.
#[derive(Clone)]
pub struct LocalCache<V: Clone> {
    storage: Arc<DashMap<String, LocalEntry<V>>>,
}

impl<V: Clone> LocalCache<V> {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(DashMap::new()),
        }
    }

    /// Returns None if not found or expired
    pub fn get(&self, key: &str) -> Option<V> {
        let entry = self.storage.get(key)?;

        // Lazy deletion
        if entry.is_expired(Instant::now()) {
            drop(entry); // Release read lock
            self.storage
                .remove_if(key, |_, e| e.is_expired(Instant::now()));
            debug!("Local entry {} expired, evicted", key);
            return None;
        }

        Some(entry.value.clone())
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let expires_at = Instant::now() + ttl;
        self.storage.insert(key.into(), LocalEntry { value, expires_at });
    }

    pub fn invalidate(&self, key: &str) -> Option<V> {
        self.storage.remove(key).map(|(_, entry)| entry.value)
    }

    /// Entries held, expired ones included until they are touched or purged.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Returns number of entries removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.storage.len();
        self.storage.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.storage.len())
    }
}

impl<V: Clone> Default for LocalCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
