//! Long-horizon turn history: in-process cache over a durable backend with a
//! file fallback, plus search and retention.

use chrono::{Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::durable_history::DurableHistory;
use crate::config::MemoryConfig;
use crate::domain::{Message, TurnEntry};
use crate::error::{TierError, TierResult};
use crate::repositories::{HistoryBackend, PersistentStore};

#[derive(Default)]
struct MemoryMetrics {
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    db_reads: AtomicU64,
    db_writes: AtomicU64,
    fallback_writes: AtomicU64,
    fallback_reads: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryStats {
    pub total_entries: usize,
    pub sessions: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub db_reads: u64,
    pub db_writes: u64,
    pub fallback_writes: u64,
    pub fallback_reads: u64,
    pub persistent_enabled: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub cache_removed: usize,
    pub fallback_removed: usize,
}

pub struct MemoryCoordinator {
    config: MemoryConfig,
    primary: Option<Arc<dyn HistoryBackend>>,
    fallback: Arc<dyn HistoryBackend>,
    archive: Option<Arc<dyn PersistentStore>>,
    conversations: DashMap<String, Vec<TurnEntry>>,
    last_cleanup: Mutex<Instant>,
    metrics: MemoryMetrics,
}

impl MemoryCoordinator {
    /// `store` is required when `use_persistent_store` is set.
    pub fn new(
        config: MemoryConfig,
        store: Option<Arc<dyn PersistentStore>>,
        fallback: Arc<dyn HistoryBackend>,
    ) -> TierResult<Self> {
        let archive = match (config.use_persistent_store, store) {
            (true, None) => {
                return Err(TierError::Configuration(
                    "use_persistent_store is set but no persistent store was provided".into(),
                ))
            }
            (true, Some(store)) => Some(store),
            (false, _) => None,
        };

        let primary = archive
            .clone()
            .map(|store| Arc::new(DurableHistory::new(store)) as Arc<dyn HistoryBackend>);

        info!(
            "Initializing MemoryCoordinator: persistent={}, fallback={}, retention={}d, max_entries={}",
            primary.is_some(),
            config.storage_path.display(),
            config.retention_days,
            config.max_entries
        );

        Ok(Self {
            config,
            primary,
            fallback,
            archive,
            conversations: DashMap::new(),
            last_cleanup: Mutex::new(Instant::now()),
            metrics: MemoryMetrics::default(),
        })
    }

    /// Record one message. Durable failures are logged; the in-process copy remains.
    pub async fn add_message(
        &self,
        session_id: &str,
        message: Message,
        intent: Option<String>,
        response: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) {
        let entry = TurnEntry::new(message)
            .with_intent(intent)
            .with_response(response)
            .with_metadata(metadata.unwrap_or_default());

        self.ensure_cached(session_id).await;
        self.push_cached(session_id, entry.clone());
        self.persist(session_id, &entry).await;

        self.cleanup_if_due().await;
    }

    /// Entries of a session, oldest first; `limit` keeps the newest ones.
    pub async fn get_conversation_history(
        &self,
        session_id: &str,
        limit: Option<usize>,
    ) -> Vec<TurnEntry> {
        let cached = self
            .conversations
            .get(session_id)
            .map(|list| tail(&list, limit));
        if let Some(entries) = cached {
            self.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
            return entries;
        }

        self.metrics.cache_misses.fetch_add(1, Ordering::Relaxed);
        let loaded = self.load_backend(session_id).await;
        let entries = tail(&loaded, limit);
        self.conversations
            .entry(session_id.to_string())
            .or_insert(loaded);
        entries
    }

    /// User message first, assistant reply second, never earlier than the user message.
    pub async fn save_turn(
        &self,
        user_id: &str,
        user_message: &str,
        assistant_response: &str,
        actions: Option<Vec<Value>>,
        context: Option<Map<String, Value>>,
    ) {
        let user_msg = Message::user(user_message).with_metadata(context.unwrap_or_default());

        let mut assistant_meta = Map::new();
        assistant_meta.insert(
            "actions".to_string(),
            Value::Array(actions.unwrap_or_default()),
        );
        let assistant_ts = Utc::now().max(user_msg.timestamp);
        let assistant_msg = Message::assistant(assistant_response)
            .with_timestamp(assistant_ts)
            .with_metadata(assistant_meta);

        self.add_message(
            user_id,
            user_msg,
            None,
            Some(assistant_response.to_string()),
            None,
        )
        .await;
        self.add_message(user_id, assistant_msg, Some("response".to_string()), None, None)
            .await;
    }

    /// Case-insensitive scan of cached entries, newest first.
    pub fn search_conversations(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> Vec<TurnEntry> {
        let needle = query.to_lowercase();

        let mut results: Vec<TurnEntry> = self
            .conversations
            .iter()
            .filter(|item| user_id.map_or(true, |u| item.key() == u))
            .flat_map(|item| {
                item.value()
                    .iter()
                    .filter(|entry| entry.matches(&needle))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        results.truncate(limit);
        results
    }

    /// Durable search; empty when the store is disabled or unreachable.
    pub async fn search_archive(
        &self,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> Vec<TurnEntry> {
        let Some(store) = &self.archive else {
            return Vec::new();
        };

        match Self::search_store(store.as_ref(), query, user_id, limit).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Archive search for '{}' failed: {}", query, e);
                Vec::new()
            }
        }
    }

    /// Forget a session locally and in the fallback files. Durable rows stay.
    pub async fn clear_session(&self, session_id: &str) {
        self.conversations.remove(session_id);

        if let Err(e) = self.fallback.remove_session(session_id).await {
            warn!("Failed to remove fallback history for {}: {}", session_id, e);
        }
        if let Some(primary) = &self.primary {
            if let Err(e) = primary.remove_session(session_id).await {
                warn!("Failed to clear durable history for {}: {}", session_id, e);
            }
        }
        info!("Session {} cleared", session_id);
    }

    /// Drop entries older than the retention window from the cache and fallback files.
    pub async fn cleanup(&self) -> CleanupReport {
        *self.last_cleanup.lock() = Instant::now();
        let cutoff = Utc::now() - ChronoDuration::days(self.config.retention_days);

        let mut report = CleanupReport::default();
        self.conversations.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| e.timestamp >= cutoff);
            report.cache_removed += before - entries.len();
            !entries.is_empty()
        });

        match self.fallback.purge_older_than(cutoff).await {
            Ok(removed) => report.fallback_removed = removed,
            Err(e) => warn!("Fallback retention sweep failed: {}", e),
        }
        if let Some(primary) = &self.primary {
            if let Err(e) = primary.purge_older_than(cutoff).await {
                warn!("Durable retention sweep failed: {}", e);
            }
        }

        info!(
            "Retention sweep: {} cached and {} fallback entries removed",
            report.cache_removed, report.fallback_removed
        );
        report
    }

    /// Periodic `cleanup()` until the coordinator is dropped.
    pub fn spawn_retention_sweep(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.cleanup_interval;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                interval.tick().await;
                let Some(this) = weak.upgrade() else {
                    debug!("Memory coordinator dropped, retention sweep stopping");
                    break;
                };
                this.cleanup().await;
            }
        })
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            total_entries: self.conversations.iter().map(|item| item.value().len()).sum(),
            sessions: self.conversations.len(),
            cache_hits: self.metrics.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.metrics.cache_misses.load(Ordering::Relaxed),
            db_reads: self.metrics.db_reads.load(Ordering::Relaxed),
            db_writes: self.metrics.db_writes.load(Ordering::Relaxed),
            fallback_writes: self.metrics.fallback_writes.load(Ordering::Relaxed),
            fallback_reads: self.metrics.fallback_reads.load(Ordering::Relaxed),
            persistent_enabled: self.primary.is_some(),
        }
    }

    async fn ensure_cached(&self, session_id: &str) {
        if self.conversations.contains_key(session_id) {
            return;
        }
        let loaded = self.load_backend(session_id).await;
        self.conversations
            .entry(session_id.to_string())
            .or_insert(loaded);
    }

    fn push_cached(&self, session_id: &str, entry: TurnEntry) {
        let mut list = self.conversations.entry(session_id.to_string()).or_default();
        list.push(entry);
        if list.len() > self.config.max_entries {
            let excess = list.len() - self.config.max_entries;
            list.drain(..excess);
        }
    }

    async fn persist(&self, session_id: &str, entry: &TurnEntry) {
        if let Some(primary) = &self.primary {
            match primary.append(session_id, entry).await {
                Ok(()) => {
                    self.metrics.db_writes.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => warn!(
                    "Durable write for {} failed, using fallback store: {}",
                    session_id, e
                ),
            }
        }

        match self.fallback.append(session_id, entry).await {
            Ok(()) => {
                self.metrics.fallback_writes.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => error!(
                "Fallback write for {} failed, entry kept in memory only: {}",
                session_id, e
            ),
        }
    }

    /// Durable backend first; the fallback files when it is empty or failing.
    async fn load_backend(&self, session_id: &str) -> Vec<TurnEntry> {
        let max = self.config.max_entries;

        if let Some(primary) = &self.primary {
            match primary.load(session_id, max).await {
                Ok(entries) if !entries.is_empty() => {
                    self.metrics.db_reads.fetch_add(1, Ordering::Relaxed);
                    return entries;
                }
                Ok(_) => {}
                Err(e) => warn!("Durable read for {} failed, trying fallback: {}", session_id, e),
            }
        }

        match self.fallback.load(session_id, max).await {
            Ok(entries) => {
                self.metrics.fallback_reads.fetch_add(1, Ordering::Relaxed);
                entries
            }
            Err(e) => {
                warn!("Fallback read for {} failed: {}", session_id, e);
                Vec::new()
            }
        }
    }

    async fn cleanup_if_due(&self) {
        let due = self.last_cleanup.lock().elapsed() >= self.config.cleanup_interval;
        if due {
            self.cleanup().await;
        }
    }

    async fn search_store(
        store: &dyn PersistentStore,
        query: &str,
        user_id: Option<&str>,
        limit: usize,
    ) -> TierResult<Vec<TurnEntry>> {
        let owner = match user_id {
            Some(username) => match store.get_user_by_username(username).await? {
                Some(user) => Some(user.id),
                None => return Ok(Vec::new()),
            },
            None => None,
        };

        let rows = store.search_messages(query, owner, limit as i64).await?;
        Ok(rows.into_iter().map(DurableHistory::to_entry).collect())
    }
}

fn tail(entries: &[TurnEntry], limit: Option<usize>) -> Vec<TurnEntry> {
    match limit {
        Some(n) if n < entries.len() => entries[entries.len() - n..].to_vec(),
        _ => entries.to_vec(),
    }
}
