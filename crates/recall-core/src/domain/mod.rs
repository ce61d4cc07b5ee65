//! # Recall Core - Domain Module

pub mod context;
pub mod entry;
pub mod message;
pub mod records;

pub use context::{ContextMetadata, ConversationContext};
pub use entry::TurnEntry;
pub use message::{Message, Role};
pub use records::{Conversation, NewMessage, Session, StoreStats, StoredMessage, User};
