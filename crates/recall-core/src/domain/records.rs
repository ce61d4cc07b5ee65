//! Durable records: users, sessions, conversations, messages

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::message::{Message, Role};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub preferences: Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub session_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_activity: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub session_id: Uuid,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Reusable while younger than `window`; afterwards it is stale.
    pub fn is_active_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now - self.created_at < window
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub intent: Option<String>,
    pub intent_confidence: Option<f64>,
    pub entities: Option<Value>,
    pub response_text: Option<String>,
    pub response_confidence: Option<f64>,
    pub tokens_used: Option<i32>,
    pub latency: Option<f64>,
    pub metadata: Map<String, Value>,
}

impl StoredMessage {
    pub fn to_message(&self) -> Message {
        Message {
            role: self.role,
            content: self.content.clone(),
            timestamp: self.timestamp,
            metadata: self.metadata.clone(),
        }
    }
}

/// Insert payload for `PersistentStore::add_message`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewMessage {
    pub role: Option<Role>,
    pub content: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub intent: Option<String>,
    pub intent_confidence: Option<f64>,
    pub entities: Option<Value>,
    pub response_text: Option<String>,
    pub response_confidence: Option<f64>,
    pub tokens_used: Option<i32>,
    pub latency: Option<f64>,
    pub embedding: Option<Vec<f32>>,
    pub metadata: Map<String, Value>,
}

impl NewMessage {
    pub fn role(&self) -> Role {
        self.role.unwrap_or(Role::User)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp.unwrap_or_else(Utc::now)
    }
}

impl From<&Message> for NewMessage {
    fn from(msg: &Message) -> Self {
        Self {
            role: Some(msg.role),
            content: msg.content.clone(),
            timestamp: Some(msg.timestamp),
            metadata: msg.metadata.clone(),
            ..Default::default()
        }
    }
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub users: i64,
    pub sessions: i64,
    pub conversations: i64,
    pub messages: i64,
}
