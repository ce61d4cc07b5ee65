//! In-memory fakes of the tier ports for scenario tests.

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use uuid::Uuid;

use crate::domain::{Conversation, NewMessage, Session, StoreStats, StoredMessage, User};
use crate::error::{Tier, TierError, TierResult};
use crate::repositories::{CacheCounters, DistributedCache, PersistentStore};

#[derive(Default)]
struct StoreState {
    users: Vec<User>,
    sessions: Vec<Session>,
    conversations: Vec<Conversation>,
    messages: Vec<StoredMessage>,
}

/// Relational store kept in a vector per table.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
    offline: AtomicBool,
    /// Fail this many `add_message` calls with a transient error first.
    flaky_adds: AtomicU64,
    /// Stall the next `get_conversation_messages` call.
    read_delay: Mutex<Option<Duration>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn fail_next_adds(&self, count: u64) {
        self.flaky_adds.store(count, Ordering::SeqCst);
    }

    pub fn message_count(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn session_count(&self) -> usize {
        self.state.lock().sessions.len()
    }

    pub fn contents(&self) -> Vec<String> {
        self.state.lock().messages.iter().map(|m| m.content.clone()).collect()
    }

    pub fn delay_next_read(&self, delay: Duration) {
        *self.read_delay.lock() = Some(delay);
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.state.lock().conversations.clone()
    }

    pub fn contents_of(&self, conversation_id: Uuid) -> Vec<String> {
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .map(|m| m.content.clone())
            .collect()
    }

    /// Age every conversation by `hours`.
    pub fn backdate_conversations(&self, hours: i64) {
        for conv in self.state.lock().conversations.iter_mut() {
            conv.created_at -= ChronoDuration::hours(hours);
        }
    }

    fn check(&self) -> TierResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(TierError::unavailable(Tier::Persistent, "store offline"));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for InMemoryStore {
    async fn ensure_schema(&self) -> TierResult<()> {
        self.check()
    }

    async fn ping(&self) -> TierResult<()> {
        self.check()
    }

    async fn get_or_create_user(&self, username: &str) -> TierResult<User> {
        self.check()?;
        let mut state = self.state.lock();
        if let Some(user) = state.users.iter().find(|u| u.username == username) {
            return Ok(user.clone());
        }
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: None,
            preferences: Value::Object(Map::new()),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn get_user_by_username(&self, username: &str) -> TierResult<Option<User>> {
        self.check()?;
        Ok(self.state.lock().users.iter().find(|u| u.username == username).cloned())
    }

    async fn get_or_create_session(&self, user_id: Uuid, token: &str) -> TierResult<Session> {
        self.check()?;
        let mut state = self.state.lock();
        if let Some(session) = state.sessions.iter().find(|s| s.session_token == token) {
            return Ok(session.clone());
        }
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4(),
            user_id,
            session_token: token.to_string(),
            created_at: now,
            expires_at: None,
            last_activity: now,
        };
        state.sessions.push(session.clone());
        Ok(session)
    }

    async fn get_session_by_token(&self, token: &str) -> TierResult<Option<Session>> {
        self.check()?;
        Ok(self.state.lock().sessions.iter().find(|s| s.session_token == token).cloned())
    }

    async fn latest_session_for_user(&self, user_id: Uuid) -> TierResult<Option<Session>> {
        self.check()?;
        // Insertion order breaks created_at ties.
        Ok(self
            .state
            .lock()
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .last()
            .cloned())
    }

    async fn get_or_create_active_conversation(&self, session_id: Uuid) -> TierResult<Conversation> {
        self.check()?;
        let now = Utc::now();
        let mut state = self.state.lock();
        if let Some(conv) = state
            .conversations
            .iter()
            .filter(|c| c.session_id == session_id && c.is_active_at(now, ChronoDuration::hours(24)))
            .max_by_key(|c| c.created_at)
        {
            return Ok(conv.clone());
        }
        let conv = Conversation {
            id: Uuid::new_v4(),
            session_id,
            title: None,
            summary: None,
            message_count: 0,
            created_at: now,
            updated_at: now,
        };
        state.conversations.push(conv.clone());
        Ok(conv)
    }

    async fn get_user_conversations(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> TierResult<Vec<Conversation>> {
        self.check()?;
        let state = self.state.lock();
        let sessions: Vec<Uuid> = state
            .sessions
            .iter()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect();
        let mut convs: Vec<Conversation> = state
            .conversations
            .iter()
            .filter(|c| sessions.contains(&c.session_id))
            .cloned()
            .collect();
        convs.reverse();
        convs.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(convs
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn add_message(&self, conversation_id: Uuid, message: NewMessage) -> TierResult<StoredMessage> {
        self.check()?;
        if self
            .flaky_adds
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TierError::Timeout {
                tier: Tier::Persistent,
                after: Duration::from_millis(1),
            });
        }

        let mut state = self.state.lock();
        let conv = state
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation_id)
            .ok_or_else(|| TierError::NotFound(format!("conversation {}", conversation_id)))?;
        conv.message_count += 1;
        conv.updated_at = Utc::now();

        let stored = StoredMessage {
            id: Uuid::new_v4(),
            conversation_id,
            role: message.role(),
            timestamp: message.timestamp(),
            content: message.content,
            intent: message.intent,
            intent_confidence: message.intent_confidence,
            entities: message.entities,
            response_text: message.response_text,
            response_confidence: message.response_confidence,
            tokens_used: message.tokens_used,
            latency: message.latency,
            metadata: message.metadata,
        };
        state.messages.push(stored.clone());
        Ok(stored)
    }

    async fn get_conversation_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> TierResult<Vec<StoredMessage>> {
        self.check()?;
        let delay = self.read_delay.lock().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock();
        let mut rows: Vec<StoredMessage> = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.timestamp);
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn search_messages(
        &self,
        query: &str,
        user_id: Option<Uuid>,
        limit: i64,
    ) -> TierResult<Vec<StoredMessage>> {
        self.check()?;
        let needle = query.to_lowercase();
        let state = self.state.lock();
        let owner = |conversation_id: Uuid| -> Option<Uuid> {
            let conv = state.conversations.iter().find(|c| c.id == conversation_id)?;
            let session = state.sessions.iter().find(|s| s.id == conv.session_id)?;
            Some(session.user_id)
        };
        let mut rows: Vec<StoredMessage> = state
            .messages
            .iter()
            .filter(|m| m.content.to_lowercase().contains(&needle))
            .filter(|m| user_id.is_none() || owner(m.conversation_id) == user_id)
            .cloned()
            .collect();
        rows.reverse();
        rows.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn refresh_message_count(&self, conversation_id: Uuid) -> TierResult<i64> {
        self.check()?;
        let mut state = self.state.lock();
        let count = state
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .count() as i64;
        if let Some(conv) = state.conversations.iter_mut().find(|c| c.id == conversation_id) {
            conv.message_count = count;
            conv.updated_at = Utc::now();
        }
        Ok(count)
    }

    async fn stats(&self) -> TierResult<StoreStats> {
        self.check()?;
        let state = self.state.lock();
        Ok(StoreStats {
            users: state.users.len() as i64,
            sessions: state.sessions.len() as i64,
            conversations: state.conversations.len() as i64,
            messages: state.messages.len() as i64,
        })
    }
}

/// Distributed cache backed by a map; TTLs are ignored.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, Value>>,
    offline: AtomicBool,
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
    errors: AtomicU64,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn raw(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    pub fn put_raw(&self, key: &str, value: Value) {
        self.entries.lock().insert(key.to_string(), value);
    }

    fn check(&self) -> TierResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            self.errors.fetch_add(1, Ordering::Relaxed);
            return Err(TierError::unavailable(Tier::Distributed, "connection refused"));
        }
        Ok(())
    }
}

#[async_trait]
impl DistributedCache for InMemoryCache {
    async fn get(&self, key: &str) -> TierResult<Option<Value>> {
        self.check()?;
        let value = self.entries.lock().get(key).cloned();
        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        Ok(value)
    }

    async fn set(&self, key: &str, value: &Value, _ttl: Duration) -> TierResult<()> {
        self.check()?;
        self.sets.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> TierResult<bool> {
        self.check()?;
        self.deletes.fetch_add(1, Ordering::Relaxed);
        Ok(self.entries.lock().remove(key).is_some())
    }

    async fn exists(&self, key: &str) -> TierResult<bool> {
        self.check()?;
        Ok(self.entries.lock().contains_key(key))
    }

    async fn expire(&self, key: &str, _ttl: Duration) -> TierResult<bool> {
        self.exists(key).await
    }

    async fn get_multiple(&self, keys: &[String]) -> TierResult<HashMap<String, Value>> {
        self.check()?;
        let entries = self.entries.lock();
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k).map(|v| (k.clone(), v.clone())))
            .collect())
    }

    async fn set_multiple(&self, entries: &HashMap<String, Value>, _ttl: Duration) -> TierResult<()> {
        self.check()?;
        self.entries.lock().extend(entries.clone());
        Ok(())
    }

    async fn clear_by_pattern(&self, pattern: &str) -> TierResult<u64> {
        self.check()?;
        let prefix = pattern.trim_end_matches('*');
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|k, _| !k.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn is_available(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    fn stats(&self) -> CacheCounters {
        CacheCounters {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            sets: self.sets.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}
