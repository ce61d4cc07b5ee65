//! Durable backend for long-horizon turn history

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::TurnEntry;
use crate::error::{Tier, TierResult};

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HistoryBackend: Send + Sync {
    fn tier(&self) -> Tier;
    async fn append(&self, session_id: &str, entry: &TurnEntry) -> TierResult<()>;
    /// Newest `limit` entries of a session, oldest first.
    async fn load(&self, session_id: &str, limit: usize) -> TierResult<Vec<TurnEntry>>;
    async fn remove_session(&self, session_id: &str) -> TierResult<()>;
    /// Drop entries older than `cutoff`; returns how many were removed.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> TierResult<usize>;
}
