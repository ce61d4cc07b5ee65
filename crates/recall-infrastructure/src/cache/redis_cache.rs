//! Redis-backed distributed cache

use async_trait::async_trait;
use deadpool_redis::redis::{self, FromRedisValue, RedisError};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime, Timeouts};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

use recall_core::error::{Tier, TierError, TierResult};
use recall_core::repositories::{CacheCounters, DistributedCache};
use recall_shared::config::RedisSettings;

const SCAN_BATCH: usize = 500;

/// Strings are stored raw, everything else as JSON text.
pub fn encode_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// JSON text decodes to its value; anything else comes back as a string.
pub fn decode_value(raw: String) -> Value {
    match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(_) => Value::String(raw),
    }
}

fn ttl_secs(ttl: Duration) -> u64 {
    ttl.as_secs().max(1)
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

pub struct RedisCache {
    pool: Pool,
    connect_timeout: Duration,
    op_timeout: Duration,
    counters: Counters,
}

impl RedisCache {
    pub fn new(pool: Pool, connect_timeout: Duration, op_timeout: Duration) -> Self {
        Self {
            pool,
            connect_timeout,
            op_timeout,
            counters: Counters::default(),
        }
    }

    /// Build the pool and verify the server answers `PING`.
    pub async fn connect(settings: &RedisSettings) -> TierResult<Self> {
        let connect_timeout = Duration::from_millis(settings.connect_timeout_ms);
        let op_timeout = Duration::from_millis(settings.op_timeout_ms);

        let mut timeouts = Timeouts::default();
        timeouts.wait = Some(connect_timeout);
        timeouts.create = Some(connect_timeout);
        timeouts.recycle = Some(connect_timeout);

        let mut pool_config = PoolConfig::new(settings.max_connections);
        pool_config.timeouts = timeouts;

        let mut config = Config::from_url(settings.connection_url());
        config.pool = Some(pool_config);

        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| TierError::Configuration(format!("redis pool: {}", e)))?;

        let cache = Self::new(pool, connect_timeout, op_timeout);
        if !cache.is_available().await {
            return Err(TierError::unavailable(
                Tier::Distributed,
                format!("no PING reply from {}:{}", settings.host, settings.port),
            ));
        }

        info!(
            "Redis cache ready at {}:{} (max {} connections)",
            settings.host, settings.port, settings.max_connections
        );
        Ok(cache)
    }

    async fn connection(&self) -> TierResult<Connection> {
        match tokio::time::timeout(self.connect_timeout, self.pool.get()).await {
            Ok(Ok(conn)) => Ok(conn),
            Ok(Err(e)) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                Err(TierError::unavailable(Tier::Distributed, e.to_string()))
            }
            Err(_) => {
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                Err(TierError::Timeout {
                    tier: Tier::Distributed,
                    after: self.connect_timeout,
                })
            }
        }
    }

    fn fail(&self, op: &str, e: RedisError) -> TierError {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!("Redis {} failed: {}", op, e);
        TierError::unavailable(Tier::Distributed, e.to_string())
    }

    fn timed_out(&self, op: &str) -> TierError {
        self.counters.errors.fetch_add(1, Ordering::Relaxed);
        warn!("Redis {} timed out after {:?}", op, self.op_timeout);
        TierError::Timeout {
            tier: Tier::Distributed,
            after: self.op_timeout,
        }
    }

    async fn exec<T: FromRedisValue>(&self, op: &str, cmd: &redis::Cmd) -> TierResult<T> {
        let mut conn = self.connection().await?;
        match tokio::time::timeout(self.op_timeout, cmd.query_async::<T>(&mut conn)).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(self.fail(op, e)),
            Err(_) => Err(self.timed_out(op)),
        }
    }

    async fn exec_pipe(&self, op: &str, pipe: &redis::Pipeline) -> TierResult<()> {
        let mut conn = self.connection().await?;
        match tokio::time::timeout(self.op_timeout, pipe.query_async::<()>(&mut conn)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(self.fail(op, e)),
            Err(_) => Err(self.timed_out(op)),
        }
    }
}

#[async_trait]
impl DistributedCache for RedisCache {
    async fn get(&self, key: &str) -> TierResult<Option<Value>> {
        let raw: Option<String> = self.exec("GET", redis::cmd("GET").arg(key)).await?;
        match raw {
            Some(raw) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Redis hit {}", key);
                Ok(Some(decode_value(raw)))
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &Value, ttl: Duration) -> TierResult<()> {
        let () = self
            .exec(
                "SETEX",
                redis::cmd("SETEX")
                    .arg(key)
                    .arg(ttl_secs(ttl))
                    .arg(encode_value(value)),
            )
            .await?;
        self.counters.sets.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn delete(&self, key: &str) -> TierResult<bool> {
        let removed: i64 = self.exec("DEL", redis::cmd("DEL").arg(key)).await?;
        self.counters.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> TierResult<bool> {
        let found: i64 = self.exec("EXISTS", redis::cmd("EXISTS").arg(key)).await?;
        Ok(found > 0)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> TierResult<bool> {
        let applied: i64 = self
            .exec("EXPIRE", redis::cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)))
            .await?;
        Ok(applied > 0)
    }

    async fn get_multiple(&self, keys: &[String]) -> TierResult<HashMap<String, Value>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }

        let values: Vec<Option<String>> = self.exec("MGET", redis::cmd("MGET").arg(keys)).await?;

        let mut found = HashMap::with_capacity(keys.len());
        for (key, raw) in keys.iter().zip(values) {
            match raw {
                Some(raw) => {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    found.insert(key.clone(), decode_value(raw));
                }
                None => {
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        Ok(found)
    }

    async fn set_multiple(&self, entries: &HashMap<String, Value>, ttl: Duration) -> TierResult<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let secs = ttl_secs(ttl);
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            pipe.cmd("SETEX")
                .arg(key)
                .arg(secs)
                .arg(encode_value(value))
                .ignore();
        }

        self.exec_pipe("SETEX pipeline", &pipe).await?;
        self.counters
            .sets
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn clear_by_pattern(&self, pattern: &str) -> TierResult<u64> {
        let mut cursor: u64 = 0;
        let mut removed: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .exec(
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(SCAN_BATCH),
                )
                .await?;

            if !keys.is_empty() {
                let count: i64 = self.exec("DEL", redis::cmd("DEL").arg(&keys)).await?;
                removed += count.max(0) as u64;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        self.counters.deletes.fetch_add(removed, Ordering::Relaxed);
        info!("Cleared {} keys matching {}", removed, pattern);
        Ok(removed)
    }

    async fn is_available(&self) -> bool {
        let Ok(mut conn) = self.connection().await else {
            return false;
        };

        let ping = redis::cmd("PING");
        matches!(
            tokio::time::timeout(self.op_timeout, ping.query_async::<String>(&mut conn)).await,
            Ok(Ok(_))
        )
    }

    fn stats(&self) -> CacheCounters {
        CacheCounters {
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            sets: self.counters.sets.load(Ordering::Relaxed),
            deletes: self.counters.deletes.load(Ordering::Relaxed),
            errors: self.counters.errors.load(Ordering::Relaxed),
        }
    }
}
