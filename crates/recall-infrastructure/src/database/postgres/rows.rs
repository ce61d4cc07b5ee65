//! Internal row types for SQLx mapping

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::FromRow;
use uuid::Uuid;

use recall_core::domain::{Conversation, Role, Session, StoredMessage, User};
use recall_core::error::TierError;

#[derive(Debug, FromRow)]
pub(crate) struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub preferences: Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            preferences: row.preferences,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct SessionRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
}

impl From<SessionRow> for Session {
    fn from(row: SessionRow) -> Self {
        Session {
            id: row.id,
            user_id: row.user_id,
            session_token: row.session_token,
            created_at: row.created_at,
            expires_at: row.expires_at,
            last_activity: row.last_activity,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct ConversationRow {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub message_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(row: ConversationRow) -> Self {
        Conversation {
            id: row.id,
            session_id: row.session_id,
            title: row.title,
            summary: row.summary,
            message_count: i64::from(row.message_count),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct MessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub intent: Option<String>,
    pub intent_confidence: Option<f64>,
    pub entities: Option<Value>,
    pub response_text: Option<String>,
    pub response_confidence: Option<f64>,
    pub tokens_used: Option<i32>,
    pub latency: Option<f64>,
    pub metadata: Value,
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = TierError;

    fn try_from(row: MessageRow) -> Result<Self, Self::Error> {
        let role: Role = row.role.parse()?;
        let metadata = match row.metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        Ok(StoredMessage {
            id: row.id,
            conversation_id: row.conversation_id,
            role,
            content: row.content,
            timestamp: row.timestamp,
            intent: row.intent,
            intent_confidence: row.intent_confidence,
            entities: row.entities,
            response_text: row.response_text,
            response_confidence: row.response_confidence,
            tokens_used: row.tokens_used,
            latency: row.latency,
            metadata,
        })
    }
}
