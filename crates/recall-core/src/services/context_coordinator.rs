//! Read-through / write-through context across the local, distributed and
//! durable tiers.

use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::availability::{AvailabilityGate, GateState};
use super::write_queue::{AppendTurn, DurableWriteQueue, QueueStats};
use crate::cache::LocalCache;
use crate::config::{ContextConfig, WriteQueueConfig};
use crate::domain::{ConversationContext, Message, Session, StoredMessage};
use crate::error::{TierError, TierResult};
use crate::repositories::{CacheCounters, DistributedCache, PersistentStore};

/// Session token used the first time a user is seen.
pub fn default_session_token(user_id: &str) -> String {
    format!("session_{}", user_id)
}

/// Fresh token for a rotated or degraded session.
pub fn rotated_session_token(user_id: &str) -> String {
    format!("session_{}_{}", user_id, Uuid::new_v4().simple())
}

#[derive(Default)]
struct ContextMetrics {
    cache_hits: AtomicU64,
    redis_hits: AtomicU64,
    redis_misses: AtomicU64,
    db_reads: AtomicU64,
    db_writes: AtomicU64,
    degraded_reads: AtomicU64,
    serialization_errors: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ContextStats {
    pub cache_hits: u64,
    pub redis_hits: u64,
    pub redis_misses: u64,
    pub db_reads: u64,
    pub db_writes: u64,
    pub degraded_reads: u64,
    pub serialization_errors: u64,
    pub cached_contexts: usize,
    pub write_queue: QueueStats,
    pub distributed: Option<CacheCounters>,
}

pub struct ContextCoordinatorBuilder {
    config: ContextConfig,
    store: Option<Arc<dyn PersistentStore>>,
    distributed: Option<Arc<dyn DistributedCache>>,
    write_queue: Option<Arc<DurableWriteQueue>>,
}

impl ContextCoordinatorBuilder {
    pub fn store(mut self, store: Arc<dyn PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn distributed(mut self, cache: Arc<dyn DistributedCache>) -> Self {
        self.distributed = Some(cache);
        self
    }

    pub fn write_queue(mut self, queue: Arc<DurableWriteQueue>) -> Self {
        self.write_queue = Some(queue);
        self
    }

    /// Fails only when no durable store was supplied. Without an explicit
    /// queue one is spawned with default settings.
    pub fn build(self) -> TierResult<ContextCoordinator> {
        let store = self.store.ok_or_else(|| {
            TierError::Configuration("context coordinator requires a persistent store".into())
        })?;

        let write_queue = self.write_queue.unwrap_or_else(|| {
            Arc::new(DurableWriteQueue::new(store.clone(), WriteQueueConfig::default()))
        });

        info!(
            "Initializing ContextCoordinator: max_history={}, ttl={:?}, distributed={}",
            self.config.max_history,
            self.config.cache_ttl,
            self.distributed.is_some()
        );

        Ok(ContextCoordinator {
            gate: AvailabilityGate::new(self.config.unavailable_cooldown),
            config: self.config,
            local: LocalCache::new(),
            distributed: self.distributed,
            store,
            write_queue,
            user_locks: DashMap::new(),
            metrics: ContextMetrics::default(),
        })
    }
}

pub struct ContextCoordinator {
    config: ContextConfig,
    local: LocalCache<ConversationContext>,
    distributed: Option<Arc<dyn DistributedCache>>,
    store: Arc<dyn PersistentStore>,
    write_queue: Arc<DurableWriteQueue>,
    gate: AvailabilityGate,
    /// Serializes read-modify-write of one user's context.
    user_locks: DashMap<String, Arc<AsyncMutex<()>>>,
    metrics: ContextMetrics,
}

impl ContextCoordinator {
    pub fn builder(config: ContextConfig) -> ContextCoordinatorBuilder {
        ContextCoordinatorBuilder {
            config,
            store: None,
            distributed: None,
            write_queue: None,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Never fails; worst case is an empty context under a new session.
    pub async fn get_context(&self, user_id: &str) -> ConversationContext {
        let key = self.config.cache_key(user_id);
        if let Some(ctx) = self.local.get(&key) {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Context for {} served from local cache", user_id);
            return ctx;
        }

        // Slow path runs under the user lock so a stale read cannot overwrite an update.
        let lock = self.user_lock(user_id);
        let ctx = {
            let _guard = lock.lock().await;
            self.resolve_context(user_id).await
        };
        self.release_user_lock(user_id, lock);
        ctx
    }

    /// Caller holds the user lock.
    async fn resolve_context(&self, user_id: &str) -> ConversationContext {
        let key = self.config.cache_key(user_id);

        // 1. Local
        if let Some(ctx) = self.local.get(&key) {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            return ctx;
        }

        // 2. Distributed
        if let Some(ctx) = self.read_distributed(&key).await {
            self.metrics.redis_hits.fetch_add(1, Ordering::Relaxed);
            self.local.set(key, ctx.clone(), self.config.cache_ttl);
            debug!("Context for {} served from distributed cache", user_id);
            return ctx;
        }

        // 3. Durable
        match self.load_from_store(user_id).await {
            Ok(ctx) => {
                self.metrics.db_reads.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Context for {} loaded from store ({} messages)",
                    user_id,
                    ctx.history.len()
                );
                self.local.set(key.clone(), ctx.clone(), self.config.cache_ttl);
                self.write_distributed(&key, &ctx).await;
                ctx
            }
            Err(e) => {
                self.metrics.degraded_reads.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Persistent tier failed loading context for {}, starting fresh: {}",
                    user_id, e
                );
                // Kept out of the distributed tier so durable history wins once the store recovers.
                let ctx = ConversationContext::new(user_id, rotated_session_token(user_id));
                self.local.set(key, ctx.clone(), self.config.cache_ttl);
                ctx
            }
        }
    }

    /// Append one exchange, write through both caches and queue the durable append.
    pub async fn update_context(&self, user_id: &str, message: &str, response: &str) {
        let lock = self.user_lock(user_id);
        {
            let _guard = lock.lock().await;
            self.append_exchange(user_id, message, response).await;
        }
        self.release_user_lock(user_id, lock);
    }

    async fn append_exchange(&self, user_id: &str, message: &str, response: &str) {
        let mut ctx = self.resolve_context(user_id).await;

        let user_msg = Message::user(message);
        let assistant_ts = Utc::now().max(user_msg.timestamp);
        let assistant_msg = Message::assistant(response).with_timestamp(assistant_ts);

        ctx.push_exchange(user_msg.clone(), assistant_msg.clone(), self.config.window());

        let key = self.config.cache_key(user_id);
        self.local.set(key.clone(), ctx.clone(), self.config.cache_ttl);
        // A context without a durable session row is degraded and stays local.
        if ctx.metadata.session_row_id.is_some() {
            self.write_distributed(&key, &ctx).await;
        }

        let queued = self.write_queue.enqueue(AppendTurn {
            user_key: user_id.to_string(),
            session_token: ctx.session_id.clone(),
            session_id: ctx.metadata.session_row_id,
            messages: vec![user_msg, assistant_msg],
        });
        if queued {
            self.metrics.db_writes.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Soft clear: drop cached context and start a new durable session.
    /// Stored rows are left untouched.
    pub async fn clear_context(&self, user_id: &str) {
        let lock = self.user_lock(user_id);
        {
            let _guard = lock.lock().await;
            self.clear_locked(user_id).await;
        }
        self.release_user_lock(user_id, lock);
    }

    async fn clear_locked(&self, user_id: &str) {
        let key = self.config.cache_key(user_id);
        self.local.invalidate(&key);

        // Attempted even while the gate is closed; a stale entry would outlive the clear.
        if let Some(cache) = &self.distributed {
            if let Err(e) = cache.delete(&key).await {
                self.gate.mark_down(&e.to_string());
                warn!("Failed to delete distributed context for {}: {}", user_id, e);
            }
        }

        match tokio::time::timeout(self.config.store_timeout, self.rotate_session(user_id)).await {
            Ok(Ok(session)) => {
                info!("Context cleared for {}, new session {}", user_id, session.session_token)
            }
            Ok(Err(e)) => warn!("Context cleared for {}, session rotation skipped: {}", user_id, e),
            Err(_) => warn!(
                "Context cleared for {}, session rotation timed out after {:?}",
                user_id, self.config.store_timeout
            ),
        }
    }

    pub fn stats(&self) -> ContextStats {
        ContextStats {
            cache_hits: self.metrics.cache_hits.load(Ordering::Relaxed),
            redis_hits: self.metrics.redis_hits.load(Ordering::Relaxed),
            redis_misses: self.metrics.redis_misses.load(Ordering::Relaxed),
            db_reads: self.metrics.db_reads.load(Ordering::Relaxed),
            db_writes: self.metrics.db_writes.load(Ordering::Relaxed),
            degraded_reads: self.metrics.degraded_reads.load(Ordering::Relaxed),
            serialization_errors: self.metrics.serialization_errors.load(Ordering::Relaxed),
            cached_contexts: self.local.len(),
            write_queue: self.write_queue.stats(),
            distributed: self.distributed.as_ref().map(|c| c.stats()),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<AsyncMutex<()>> {
        self.user_locks
            .entry(user_id.to_string())
            .or_default()
            .clone()
    }

    /// Drop the map entry once no other task holds or waits on it.
    fn release_user_lock(&self, user_id: &str, lock: Arc<AsyncMutex<()>>) {
        drop(lock);
        self.user_locks
            .remove_if(user_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// The distributed tier if configured and not inside its cooldown.
    async fn distributed_ready(&self) -> Option<&Arc<dyn DistributedCache>> {
        let cache = self.distributed.as_ref()?;
        match self.gate.state() {
            GateState::Open => Some(cache),
            GateState::Closed => None,
            GateState::Probe => {
                if cache.is_available().await {
                    self.gate.mark_up();
                    Some(cache)
                } else {
                    self.gate.mark_down("liveness probe failed");
                    None
                }
            }
        }
    }

    async fn read_distributed(&self, key: &str) -> Option<ConversationContext> {
        let cache = self.distributed_ready().await?;

        match cache.get(key).await {
            Ok(Some(value)) => match ConversationContext::from_json(value) {
                Ok(ctx) => Some(ctx),
                Err(e) => {
                    self.metrics.serialization_errors.fetch_add(1, Ordering::Relaxed);
                    self.metrics.redis_misses.fetch_add(1, Ordering::Relaxed);
                    warn!("Discarding corrupt cached context {}: {}", key, e);
                    if let Err(e) = cache.delete(key).await {
                        debug!("Failed to delete corrupt context {}: {}", key, e);
                    }
                    None
                }
            },
            Ok(None) => {
                self.metrics.redis_misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.metrics.redis_misses.fetch_add(1, Ordering::Relaxed);
                self.gate.mark_down(&e.to_string());
                None
            }
        }
    }

    async fn write_distributed(&self, key: &str, ctx: &ConversationContext) {
        let Some(cache) = self.distributed_ready().await else {
            return;
        };

        let value = match ctx.to_json() {
            Ok(value) => value,
            Err(e) => {
                self.metrics.serialization_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to serialize context {}: {}", key, e);
                return;
            }
        };

        if let Err(e) = cache.set(key, &value, self.config.cache_ttl).await {
            self.gate.mark_down(&e.to_string());
        }
    }

    /// user → latest session (or the default one) → active conversation → newest messages.
    async fn load_from_store(&self, user_id: &str) -> TierResult<ConversationContext> {
        let user = self.store.get_or_create_user(user_id).await?;

        let session = match self.store.latest_session_for_user(user.id).await? {
            Some(session) => session,
            None => {
                self.store
                    .get_or_create_session(user.id, &default_session_token(user_id))
                    .await?
            }
        };

        let conversation = self
            .store
            .get_or_create_active_conversation(session.id)
            .await?;

        let limit = self.config.max_history as i64;
        let offset = (conversation.message_count - limit).max(0);
        let rows = self
            .store
            .get_conversation_messages(conversation.id, limit, offset)
            .await?;

        let mut ctx = ConversationContext::new(user_id, session.session_token);
        ctx.history = rows.iter().map(StoredMessage::to_message).collect();
        ctx.metadata.conversation_id = Some(conversation.id);
        ctx.metadata.session_row_id = Some(session.id);
        ctx.metadata.message_count = ctx.history.len();
        Ok(ctx)
    }

    async fn rotate_session(&self, user_id: &str) -> TierResult<Session> {
        let user = self.store.get_or_create_user(user_id).await?;
        self.store
            .get_or_create_session(user.id, &rotated_session_token(user_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;
    use crate::error::Tier;
    use crate::repositories::{MockDistributedCache, MockPersistentStore};
    use crate::testing::{InMemoryCache, InMemoryStore};
    use serde_json::json;
    use std::time::Duration;

    fn config(max_history: usize) -> ContextConfig {
        ContextConfig {
            max_history,
            unavailable_cooldown: Duration::from_secs(60),
            ..Default::default()
        }
    }

    fn coordinator(
        max_history: usize,
        store: Arc<InMemoryStore>,
        cache: Option<Arc<InMemoryCache>>,
    ) -> ContextCoordinator {
        let mut builder = ContextCoordinator::builder(config(max_history)).store(store);
        if let Some(cache) = cache {
            builder = builder.distributed(cache);
        }
        builder.build().unwrap()
    }

    #[test]
    fn test_build_without_store_is_configuration_error() {
        let result = ContextCoordinator::builder(ContextConfig::default()).build();
        assert!(matches!(result, Err(TierError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_consecutive_reads_are_equal() {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let coord = coordinator(20, store, Some(cache));

        let first = coord.get_context("alice").await;
        let second = coord.get_context("alice").await;

        assert_eq!(first, second);
        assert_eq!(first.session_id, "session_alice");
        let stats = coord.stats();
        assert_eq!(stats.db_reads, 1);
        assert_eq!(stats.cache_hits, 1);
    }

    #[tokio::test]
    async fn test_alice_scenario_keeps_order() {
        let store = Arc::new(InMemoryStore::new());
        let coord = coordinator(20, store.clone(), Some(Arc::new(InMemoryCache::new())));

        coord.update_context("alice", "hello", "r1").await;
        coord.update_context("alice", "what's the weather", "r2").await;

        let ctx = coord.get_context("alice").await;
        let history: Vec<(Role, &str)> =
            ctx.history.iter().map(|m| (m.role, m.content.as_str())).collect();
        assert_eq!(
            history,
            vec![
                (Role::User, "hello"),
                (Role::Assistant, "r1"),
                (Role::User, "what's the weather"),
                (Role::Assistant, "r2"),
            ]
        );
        assert!(ctx.history[1].timestamp >= ctx.history[0].timestamp);
        assert!(ctx.history[3].timestamp >= ctx.history[2].timestamp);

        coord.write_queue.shutdown().await;
        assert_eq!(store.contents(), vec!["hello", "r1", "what's the weather", "r2"]);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let store = Arc::new(InMemoryStore::new());
        let coord = coordinator(3, store, None);

        for n in 1..=5usize {
            coord.update_context("bob", &format!("q{}", n), &format!("a{}", n)).await;
            let ctx = coord.get_context("bob").await;
            assert_eq!(ctx.history.len(), (2 * n).min(6));
        }

        let ctx = coord.get_context("bob").await;
        assert_eq!(ctx.history.first().map(|m| m.content.as_str()), Some("q3"));
        assert_eq!(ctx.metadata.message_count, 6);
    }

    #[tokio::test]
    async fn test_cold_load_reads_newest_messages_of_active_conversation() {
        let store = Arc::new(InMemoryStore::new());
        let writer = coordinator(2, store.clone(), None);
        for n in 0..4 {
            writer.update_context("carol", &format!("q{}", n), &format!("a{}", n)).await;
        }
        writer.write_queue.shutdown().await;

        // A second process with cold caches.
        let reader = coordinator(2, store, None);
        let ctx = reader.get_context("carol").await;
        let contents: Vec<&str> = ctx.history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["q3", "a3"]);
        assert!(ctx.metadata.conversation_id.is_some());
    }

    #[tokio::test]
    async fn test_distributed_hit_populates_local() {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let warm = coordinator(20, store.clone(), Some(cache.clone()));
        warm.update_context("dave", "ping", "pong").await;

        let other = coordinator(20, store, Some(cache));
        let ctx = other.get_context("dave").await;
        assert_eq!(ctx.history.len(), 2);
        let again = other.get_context("dave").await;
        assert_eq!(ctx, again);

        let stats = other.stats();
        assert_eq!(stats.redis_hits, 1);
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.db_reads, 0);
    }

    #[tokio::test]
    async fn test_unavailable_distributed_falls_back_to_store() {
        let store = Arc::new(InMemoryStore::new());
        let writer = coordinator(20, store.clone(), None);
        writer.update_context("erin", "hi", "hello erin").await;
        writer.write_queue.shutdown().await;

        let cache = Arc::new(InMemoryCache::new());
        cache.set_offline(true);
        let coord = coordinator(20, store, Some(cache.clone()));

        let ctx = coord.get_context("erin").await;
        assert_eq!(ctx.history.len(), 2);
        assert_eq!(ctx.history[1].content, "hello erin");
        assert_eq!(coord.stats().db_reads, 1);
        assert!(cache.stats().errors >= 1);
    }

    #[tokio::test]
    async fn test_gate_skips_distributed_during_cooldown() {
        let mut cache = MockDistributedCache::new();
        cache
            .expect_get()
            .times(1)
            .returning(|_| Err(TierError::unavailable(Tier::Distributed, "refused")));
        cache.expect_set().never();
        cache.expect_is_available().never();
        cache.expect_stats().returning(CacheCounters::default);

        let coord = ContextCoordinator::builder(config(20))
            .store(Arc::new(InMemoryStore::new()))
            .distributed(Arc::new(cache))
            .build()
            .unwrap();

        let ctx = coord.get_context("frank").await;
        assert!(ctx.history.is_empty());
        coord.local.invalidate(&coord.config.cache_key("frank"));
        coord.get_context("frank").await;
        assert_eq!(coord.stats().db_reads, 2);
    }

    #[tokio::test]
    async fn test_gate_probes_after_cooldown() {
        let mut cache = MockDistributedCache::new();
        let mut seq = mockall::Sequence::new();
        cache
            .expect_get()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(TierError::unavailable(Tier::Distributed, "refused")));
        cache
            .expect_is_available()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| false);
        cache
            .expect_is_available()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| true);
        cache.expect_set().times(1).in_sequence(&mut seq).returning(|_, _, _| Ok(()));

        let coord = ContextCoordinator::builder(ContextConfig {
            unavailable_cooldown: Duration::ZERO,
            ..Default::default()
        })
        .store(Arc::new(InMemoryStore::new()))
        .distributed(Arc::new(cache))
        .build()
        .unwrap();

        // get fails, the write-back probe fails, context still served from the store.
        coord.get_context("gina").await;
        // Next write-back probes again and succeeds.
        coord.update_context("gina", "hi", "hello").await;
    }

    #[tokio::test]
    async fn test_corrupt_cached_payload_is_a_miss() {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(InMemoryCache::new());
        cache.put_raw("context:hank", json!({"history": "not-a-list"}));
        let coord = coordinator(20, store, Some(cache.clone()));

        let ctx = coord.get_context("hank").await;
        assert_eq!(ctx.user_id, "hank");
        let stats = coord.stats();
        assert_eq!(stats.serialization_errors, 1);
        assert_eq!(stats.db_reads, 1);

        let repaired = cache.raw("context:hank").unwrap();
        assert_eq!(repaired["user_id"], json!("hank"));
    }

    #[tokio::test]
    async fn test_store_failure_yields_fresh_context() {
        let store = Arc::new(InMemoryStore::new());
        store.set_offline(true);
        let cache = Arc::new(InMemoryCache::new());
        let coord = coordinator(20, store, Some(cache.clone()));

        let ctx = coord.get_context("ivan").await;
        assert!(ctx.history.is_empty());
        assert!(ctx.session_id.starts_with("session_ivan_"));
        assert_eq!(coord.stats().degraded_reads, 1);
        assert!(cache.raw("context:ivan").is_none());

        assert_eq!(coord.get_context("ivan").await, ctx);
    }

    #[tokio::test]
    async fn test_clear_starts_new_session_and_keeps_rows() {
        let store = Arc::new(InMemoryStore::new());
        let cache = Arc::new(InMemoryCache::new());
        let coord = coordinator(20, store.clone(), Some(cache.clone()));

        coord.update_context("u1", "remember this", "noted").await;
        coord.write_queue.shutdown().await;
        let before = coord.get_context("u1").await;

        coord.clear_context("u1").await;
        assert!(cache.raw("context:u1").is_none());

        let after = coord.get_context("u1").await;
        assert!(after.history.is_empty());
        assert_ne!(after.session_id, before.session_id);
        assert_eq!(store.message_count(), 2);
        assert_eq!(store.session_count(), 2);
    }

    #[tokio::test]
    async fn test_clear_with_store_down_still_drops_caches() {
        let mut store = MockPersistentStore::new();
        store
            .expect_get_or_create_user()
            .returning(|_| Err(TierError::unavailable(Tier::Persistent, "down")));

        let cache = Arc::new(InMemoryCache::new());
        cache.put_raw("context:jo", json!({"stale": true}));
        let coord = ContextCoordinator::builder(config(20))
            .store(Arc::new(store))
            .distributed(cache.clone())
            .build()
            .unwrap();

        coord.clear_context("jo").await;
        assert!(cache.raw("context:jo").is_none());

        let ctx = coord.get_context("jo").await;
        assert!(ctx.history.is_empty());
        assert_eq!(coord.stats().degraded_reads, 1);
    }

    #[tokio::test]
    async fn test_update_during_cold_load_is_not_overwritten() {
        let store = Arc::new(InMemoryStore::new());
        store.delay_next_read(Duration::from_millis(100));
        let cache = Arc::new(InMemoryCache::new());
        let coord = coordinator(20, store, Some(cache.clone()));

        let (cold, ()) = tokio::join!(coord.get_context("zoe"), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            coord.update_context("zoe", "hello", "hi zoe").await;
        });
        assert!(cold.history.is_empty());

        let ctx = coord.get_context("zoe").await;
        assert_eq!(ctx.history.len(), 2);
        let cached = ConversationContext::from_json(cache.raw("context:zoe").unwrap()).unwrap();
        assert_eq!(cached.history.len(), 2);
    }

    #[tokio::test]
    async fn test_user_locks_are_released() {
        let coord = coordinator(20, Arc::new(InMemoryStore::new()), None);

        coord.get_context("kim").await;
        coord.update_context("kim", "a", "b").await;
        coord.clear_context("kim").await;
        assert!(coord.user_locks.is_empty());
    }

    #[tokio::test]
    async fn test_degraded_update_stays_out_of_distributed_tier() {
        let store = Arc::new(InMemoryStore::new());
        store.set_offline(true);
        let cache = Arc::new(InMemoryCache::new());
        let coord = coordinator(20, store, Some(cache.clone()));

        coord.update_context("lee", "anyone there", "yes").await;

        assert!(cache.raw("context:lee").is_none());
        assert_eq!(coord.get_context("lee").await.history.len(), 2);
    }

    #[tokio::test]
    async fn test_stale_conversation_is_not_resumed() {
        let store = Arc::new(InMemoryStore::new());
        let writer = coordinator(20, store.clone(), None);
        writer.update_context("mia", "old topic", "ok").await;
        writer.write_queue.shutdown().await;

        let old = coordinator(20, store.clone(), None).get_context("mia").await;
        assert_eq!(old.history.len(), 2);

        store.backdate_conversations(24);
        let fresh = coordinator(20, store.clone(), None).get_context("mia").await;
        assert!(fresh.history.is_empty());
        assert_ne!(fresh.metadata.conversation_id, old.metadata.conversation_id);
        assert_eq!(fresh.session_id, old.session_id);
        assert_eq!(store.message_count(), 2);
    }
}
