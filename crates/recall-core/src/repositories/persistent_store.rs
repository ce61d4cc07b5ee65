//! Persistent store port

use async_trait::async_trait;
use uuid::Uuid;

use crate::domain::{Conversation, NewMessage, Session, StoreStats, StoredMessage, User};
use crate::error::TierResult;

/// Durable relational store of users, sessions, conversations and messages.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Create tables and indices when missing.
    async fn ensure_schema(&self) -> TierResult<()>;
    async fn ping(&self) -> TierResult<()>;

    async fn get_or_create_user(&self, username: &str) -> TierResult<User>;
    async fn get_user_by_username(&self, username: &str) -> TierResult<Option<User>>;

    async fn get_or_create_session(&self, user_id: Uuid, token: &str) -> TierResult<Session>;
    async fn get_session_by_token(&self, token: &str) -> TierResult<Option<Session>>;
    /// Most recently created session of a user.
    async fn latest_session_for_user(&self, user_id: Uuid) -> TierResult<Option<Session>>;

    /// Newest conversation of the session created within the reuse window,
    /// or a fresh one.
    async fn get_or_create_active_conversation(&self, session_id: Uuid) -> TierResult<Conversation>;
    /// Ordered by `updated_at` descending.
    async fn get_user_conversations(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> TierResult<Vec<Conversation>>;

    /// Insert and bump the conversation counter atomically.
    async fn add_message(&self, conversation_id: Uuid, message: NewMessage) -> TierResult<StoredMessage>;
    /// Ordered by timestamp ascending.
    async fn get_conversation_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> TierResult<Vec<StoredMessage>>;
    /// Case-insensitive content match, newest first.
    async fn search_messages(
        &self,
        query: &str,
        user_id: Option<Uuid>,
        limit: i64,
    ) -> TierResult<Vec<StoredMessage>>;
    /// Recompute `message_count` from the rows; returns the new count.
    async fn refresh_message_count(&self, conversation_id: Uuid) -> TierResult<i64>;

    async fn stats(&self) -> TierResult<StoreStats>;
}
