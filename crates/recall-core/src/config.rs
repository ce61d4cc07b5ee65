//! Component configuration

use std::path::PathBuf;
use std::time::Duration;

use recall_shared::config::{ContextSettings, MemorySettings, WriteQueueSettings};
use recall_shared::constants::*;

#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Messages fetched on a cold load; the cached window holds `2 * max_history`.
    pub max_history: usize,
    pub cache_ttl: Duration,
    /// Prefix of distributed cache keys (`<prefix>:<user>`).
    pub key_prefix: String,
    /// How long the distributed tier is skipped after an error.
    pub unavailable_cooldown: Duration,
    /// Upper bound for the store calls made while clearing a context.
    pub store_timeout: Duration,
}

impl ContextConfig {
    pub fn window(&self) -> usize {
        self.max_history.saturating_mul(2)
    }

    pub fn cache_key(&self, user_id: &str) -> String {
        format!("{}:{}", self.key_prefix, user_id)
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            key_prefix: "context".to_string(),
            unavailable_cooldown: Duration::from_secs(5),
            store_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&ContextSettings> for ContextConfig {
    fn from(s: &ContextSettings) -> Self {
        Self {
            max_history: s.max_history,
            cache_ttl: Duration::from_secs(s.cache_ttl_secs),
            unavailable_cooldown: Duration::from_secs(s.unavailable_cooldown_secs),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub use_persistent_store: bool,
    pub storage_path: PathBuf,
    pub retention_days: i64,
    /// Per-session cap of the in-process history.
    pub max_entries: usize,
    pub cleanup_interval: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            use_persistent_store: true,
            storage_path: PathBuf::from(DEFAULT_STORAGE_PATH),
            retention_days: DEFAULT_RETENTION_DAYS,
            max_entries: DEFAULT_MAX_ENTRIES,
            cleanup_interval: Duration::from_secs(DEFAULT_CLEANUP_INTERVAL_SECS),
        }
    }
}

impl From<&MemorySettings> for MemoryConfig {
    fn from(s: &MemorySettings) -> Self {
        Self {
            use_persistent_store: s.use_persistent_store,
            storage_path: s.storage_path.clone(),
            retention_days: s.retention_days,
            max_entries: s.max_entries,
            cleanup_interval: Duration::from_secs(s.cleanup_interval_secs),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteQueueConfig {
    pub workers: usize,
    /// Pending jobs per worker.
    pub capacity: usize,
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl WriteQueueConfig {
    /// `base · 2^attempt`, capped, before jitter.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for WriteQueueConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            capacity: 256,
            max_retries: 5,
            base_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl From<&WriteQueueSettings> for WriteQueueConfig {
    fn from(s: &WriteQueueSettings) -> Self {
        Self {
            workers: s.workers,
            capacity: s.capacity,
            max_retries: s.max_retries,
            base_backoff: Duration::from_millis(s.base_backoff_ms),
            max_backoff: Duration::from_millis(s.max_backoff_ms),
        }
    }
}
