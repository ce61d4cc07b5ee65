//! Turn history kept in the persistent store.
//!
//! A history session id doubles as username and session token, so each
//! session owns exactly one durable user and session row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::domain::{Message, NewMessage, StoredMessage, TurnEntry};
use crate::error::{Tier, TierResult};
use crate::repositories::{HistoryBackend, PersistentStore};

const MESSAGE_METADATA_KEY: &str = "message_metadata";

pub struct DurableHistory {
    store: Arc<dyn PersistentStore>,
}

impl DurableHistory {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self { store }
    }

    fn to_new_message(entry: &TurnEntry) -> NewMessage {
        let mut metadata = entry.metadata.clone();
        if !entry.message.metadata.is_empty() {
            metadata.insert(
                MESSAGE_METADATA_KEY.to_string(),
                Value::Object(entry.message.metadata.clone()),
            );
        }

        NewMessage {
            role: Some(entry.message.role),
            content: entry.message.content.clone(),
            timestamp: Some(entry.timestamp),
            intent: entry.intent.clone(),
            response_text: entry.response.clone(),
            metadata,
            ..Default::default()
        }
    }

    pub(crate) fn to_entry(row: StoredMessage) -> TurnEntry {
        let mut metadata = row.metadata;
        let message_metadata = match metadata.remove(MESSAGE_METADATA_KEY) {
            Some(Value::Object(map)) => map,
            _ => Default::default(),
        };

        TurnEntry {
            message: Message {
                role: row.role,
                content: row.content,
                timestamp: row.timestamp,
                metadata: message_metadata,
            },
            intent: row.intent,
            response: row.response_text,
            timestamp: row.timestamp,
            metadata,
        }
    }
}

#[async_trait]
impl HistoryBackend for DurableHistory {
    fn tier(&self) -> Tier {
        Tier::Persistent
    }

    async fn append(&self, session_id: &str, entry: &TurnEntry) -> TierResult<()> {
        let user = self.store.get_or_create_user(session_id).await?;
        let session = self.store.get_or_create_session(user.id, session_id).await?;
        let conversation = self
            .store
            .get_or_create_active_conversation(session.id)
            .await?;

        self.store
            .add_message(conversation.id, Self::to_new_message(entry))
            .await?;
        Ok(())
    }

    async fn load(&self, session_id: &str, limit: usize) -> TierResult<Vec<TurnEntry>> {
        let Some(user) = self.store.get_user_by_username(session_id).await? else {
            return Ok(Vec::new());
        };

        let conversations = self.store.get_user_conversations(user.id, 1, 0).await?;
        let Some(conversation) = conversations.into_iter().next() else {
            return Ok(Vec::new());
        };

        let limit = limit as i64;
        let offset = (conversation.message_count - limit).max(0);
        let rows = self
            .store
            .get_conversation_messages(conversation.id, limit, offset)
            .await?;

        Ok(rows.into_iter().map(Self::to_entry).collect())
    }

    async fn remove_session(&self, session_id: &str) -> TierResult<()> {
        info!("Durable rows for {} retained on clear", session_id);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> TierResult<usize> {
        info!("Durable retention deferred, nothing purged before {}", cutoff);
        Ok(0)
    }
}
