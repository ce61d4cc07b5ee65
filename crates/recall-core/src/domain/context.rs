//! Short-horizon conversation context

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::message::Message;
use crate::error::TierResult;

/// Context metadata. Unknown keys are carried through `extra` untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub last_updated: DateTime<Utc>,
    /// Backing durable conversation, when known.
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    /// Row id of the durable session that `session_id` names.
    #[serde(default)]
    pub session_row_id: Option<Uuid>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContextMetadata {
    pub fn new() -> Self {
        Self {
            last_updated: Utc::now(),
            conversation_id: None,
            session_row_id: None,
            message_count: 0,
            extra: Map::new(),
        }
    }
}

impl Default for ContextMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// Recent history of one user, as served by the fast path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub user_id: String,
    /// Opaque session token.
    pub session_id: String,
    pub history: Vec<Message>,
    pub metadata: ContextMetadata,
}

impl ConversationContext {
    pub fn new(user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            session_id: session_id.into(),
            history: Vec::new(),
            metadata: ContextMetadata::new(),
        }
    }

    /// Append one exchange and keep only the newest `window` messages.
    pub fn push_exchange(&mut self, user: Message, assistant: Message, window: usize) {
        self.history.push(user);
        self.history.push(assistant);

        if self.history.len() > window {
            let excess = self.history.len() - window;
            self.history.drain(..excess);
        }

        self.metadata.last_updated = Utc::now();
        self.metadata.message_count = self.history.len();
    }

    pub fn to_json(&self) -> TierResult<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: Value) -> TierResult<Self> {
        Ok(serde_json::from_value(value)?)
    }
}
