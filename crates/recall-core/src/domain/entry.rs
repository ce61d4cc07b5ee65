//! Long-horizon turn entry

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::message::Message;

/// One recorded message with the intent and response it was paired with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnEntry {
    pub message: Message,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl TurnEntry {
    pub fn new(message: Message) -> Self {
        Self {
            timestamp: message.timestamp,
            message,
            intent: None,
            response: None,
            metadata: Map::new(),
        }
    }

    pub fn with_intent(mut self, intent: Option<String>) -> Self {
        self.intent = intent;
        self
    }

    pub fn with_response(mut self, response: Option<String>) -> Self {
        self.response = response;
        self
    }

    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }

    /// Case-insensitive match; `needle` must already be lowercase.
    pub fn matches(&self, needle: &str) -> bool {
        let hit = |field: &str| field.to_lowercase().contains(needle);

        hit(&self.message.content)
            || self.intent.as_deref().map(hit).unwrap_or(false)
            || self.response.as_deref().map(hit).unwrap_or(false)
    }
}
