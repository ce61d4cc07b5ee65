//! Distributed cache port

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::TierResult;

/// Counter snapshot of a distributed cache client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheCounters {
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub errors: u64,
}

impl CacheCounters {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Shared TTL key-value store holding JSON values.
///
/// Strings that are not JSON documents round-trip as `Value::String`.
/// Backend failures come back as transient [`crate::TierError`]s and
/// bump the `errors` counter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DistributedCache: Send + Sync {
    async fn get(&self, key: &str) -> TierResult<Option<Value>>;
    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> TierResult<()>;
    /// Returns whether a key was removed.
    async fn delete(&self, key: &str) -> TierResult<bool>;
    async fn exists(&self, key: &str) -> TierResult<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> TierResult<bool>;
    /// Missing keys are absent from the result.
    async fn get_multiple(&self, keys: &[String]) -> TierResult<HashMap<String, Value>>;
    async fn set_multiple(&self, entries: &HashMap<String, Value>, ttl: Duration) -> TierResult<()>;
    /// Deletes every key matching a glob pattern; returns how many.
    async fn clear_by_pattern(&self, pattern: &str) -> TierResult<u64>;
    /// Lightweight liveness probe.
    async fn is_available(&self) -> bool;
    fn stats(&self) -> CacheCounters;
}
