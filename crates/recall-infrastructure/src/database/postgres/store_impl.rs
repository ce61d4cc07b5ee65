// ============================================================================
// Recall Infrastructure - PostgreSQL Persistent Store
// File: crates/recall-infrastructure/src/database/postgres/store_impl.rs
// ============================================================================

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Value;
use sqlx::PgPool;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};
use uuid::Uuid;

use recall_core::domain::{Conversation, NewMessage, Session, StoreStats, StoredMessage, User};
use recall_core::error::{Tier, TierError, TierResult};
use recall_core::repositories::PersistentStore;
use recall_shared::constants::ACTIVE_CONVERSATION_WINDOW_HOURS;

use super::rows::{ConversationRow, MessageRow, SessionRow, UserRow};
use crate::database::schema;

const USER_COLUMNS: &str = "id, username, email, preferences, is_active, created_at, updated_at";
const SESSION_COLUMNS: &str = "id, user_id, session_token, created_at, expires_at, last_activity";
const MESSAGE_COLUMNS: &str = "m.id, m.conversation_id, m.role, m.content, m.timestamp, m.intent, \
     m.intent_confidence, m.entities, m.response_text, m.response_confidence, m.tokens_used, \
     m.latency, m.metadata";

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn map_sqlx_error(op: &str, e: sqlx::Error) -> TierError {
    match e {
        sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::WorkerCrashed => {
            warn!("Persistent store unreachable during {}: {}", op, e);
            TierError::unavailable(Tier::Persistent, e.to_string())
        }
        sqlx::Error::RowNotFound => TierError::NotFound(op.to_string()),
        other => {
            error!("Database error during {}: {}", op, other);
            TierError::Persistence(other.to_string())
        }
    }
}

pub struct PgPersistentStore {
    pool: PgPool,
    op_timeout: Duration,
}

impl PgPersistentStore {
    pub fn new(pool: PgPool, op_timeout: Duration) -> Self {
        Self { pool, op_timeout }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Bound an operation by the per-operation timeout and map its error.
    async fn timed<T, F>(&self, op: &'static str, fut: F) -> TierResult<T>
    where
        F: Future<Output = Result<T, sqlx::Error>> + Send,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(result) => result.map_err(|e| map_sqlx_error(op, e)),
            Err(_) => {
                warn!("Persistent store {} timed out after {:?}", op, self.op_timeout);
                Err(TierError::Timeout {
                    tier: Tier::Persistent,
                    after: self.op_timeout,
                })
            }
        }
    }

    async fn active_conversation_tx(&self, session_id: Uuid) -> Result<ConversationRow, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // Serialize concurrent get-or-create for the same session.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(session_id.to_string())
            .execute(&mut *tx)
            .await?;

        let cutoff = Utc::now() - ChronoDuration::hours(ACTIVE_CONVERSATION_WINDOW_HOURS);
        let existing: Option<ConversationRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, title, summary, message_count, created_at, updated_at
            FROM conversations
            WHERE session_id = $1 AND created_at >= $2
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .bind(cutoff)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match existing {
            Some(row) => row,
            None => {
                let title = format!("Conversation {}", Utc::now().format("%Y-%m-%d %H:%M"));
                debug!("Creating conversation for session {}", session_id);
                sqlx::query_as(
                    r#"
                    INSERT INTO conversations (session_id, title)
                    VALUES ($1, $2)
                    RETURNING id, session_id, title, summary, message_count, created_at, updated_at
                    "#,
                )
                .bind(session_id)
                .bind(title)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        tx.commit().await?;
        Ok(row)
    }

    async fn add_message_tx(
        &self,
        conversation_id: Uuid,
        message: NewMessage,
    ) -> Result<MessageRow, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let row: MessageRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO messages AS m (
                conversation_id, role, content, timestamp, intent, intent_confidence,
                entities, response_text, response_confidence, tokens_used, latency,
                embedding, metadata
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            MESSAGE_COLUMNS
        ))
        .bind(conversation_id)
        .bind(message.role().as_str())
        .bind(&message.content)
        .bind(message.timestamp())
        .bind(&message.intent)
        .bind(message.intent_confidence)
        .bind(&message.entities)
        .bind(&message.response_text)
        .bind(message.response_confidence)
        .bind(message.tokens_used)
        .bind(message.latency)
        .bind(&message.embedding)
        .bind(Value::Object(message.metadata.clone()))
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE conversations
            SET message_count = message_count + 1, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(row)
    }
}

#[async_trait]
impl PersistentStore for PgPersistentStore {
    async fn ensure_schema(&self) -> TierResult<()> {
        self.timed("ensure_schema", schema::ensure_schema(&self.pool))
            .await
    }

    async fn ping(&self) -> TierResult<()> {
        self.timed("ping", async {
            sqlx::query("SELECT 1").execute(&self.pool).await.map(|_| ())
        })
        .await
    }

    async fn get_or_create_user(&self, username: &str) -> TierResult<User> {
        // Conflicts on the unique key resolve to the existing row.
        let row: UserRow = self
            .timed(
                "get_or_create_user",
                sqlx::query_as(&format!(
                    r#"
                    INSERT INTO users (username)
                    VALUES ($1)
                    ON CONFLICT (username) DO UPDATE SET username = EXCLUDED.username
                    RETURNING {}
                    "#,
                    USER_COLUMNS
                ))
                .bind(username)
                .fetch_one(&self.pool),
            )
            .await?;

        Ok(row.into())
    }

    async fn get_user_by_username(&self, username: &str) -> TierResult<Option<User>> {
        let row: Option<UserRow> = self
            .timed(
                "get_user_by_username",
                sqlx::query_as(&format!(
                    "SELECT {} FROM users WHERE username = $1",
                    USER_COLUMNS
                ))
                .bind(username)
                .fetch_optional(&self.pool),
            )
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn get_or_create_session(&self, user_id: Uuid, token: &str) -> TierResult<Session> {
        let row: SessionRow = self
            .timed(
                "get_or_create_session",
                sqlx::query_as(&format!(
                    r#"
                    INSERT INTO sessions (user_id, session_token)
                    VALUES ($1, $2)
                    ON CONFLICT (session_token) DO UPDATE SET last_activity = NOW()
                    RETURNING {}
                    "#,
                    SESSION_COLUMNS
                ))
                .bind(user_id)
                .bind(token)
                .fetch_one(&self.pool),
            )
            .await?;

        Ok(row.into())
    }

    async fn get_session_by_token(&self, token: &str) -> TierResult<Option<Session>> {
        let row: Option<SessionRow> = self
            .timed(
                "get_session_by_token",
                sqlx::query_as(&format!(
                    "SELECT {} FROM sessions WHERE session_token = $1",
                    SESSION_COLUMNS
                ))
                .bind(token)
                .fetch_optional(&self.pool),
            )
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn latest_session_for_user(&self, user_id: Uuid) -> TierResult<Option<Session>> {
        let row: Option<SessionRow> = self
            .timed(
                "latest_session_for_user",
                sqlx::query_as(&format!(
                    r#"
                    SELECT {} FROM sessions
                    WHERE user_id = $1
                    ORDER BY created_at DESC
                    LIMIT 1
                    "#,
                    SESSION_COLUMNS
                ))
                .bind(user_id)
                .fetch_optional(&self.pool),
            )
            .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn get_or_create_active_conversation(&self, session_id: Uuid) -> TierResult<Conversation> {
        let row = self
            .timed(
                "get_or_create_active_conversation",
                self.active_conversation_tx(session_id),
            )
            .await?;

        Ok(row.into())
    }

    async fn get_user_conversations(
        &self,
        user_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> TierResult<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = self
            .timed(
                "get_user_conversations",
                sqlx::query_as(
                    r#"
                    SELECT c.id, c.session_id, c.title, c.summary, c.message_count,
                           c.created_at, c.updated_at
                    FROM conversations c
                    JOIN sessions s ON s.id = c.session_id
                    WHERE s.user_id = $1
                    ORDER BY c.updated_at DESC
                    LIMIT $2 OFFSET $3
                    "#,
                )
                .bind(user_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
            )
            .await?;

        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    async fn add_message(&self, conversation_id: Uuid, message: NewMessage) -> TierResult<StoredMessage> {
        let row = self
            .timed("add_message", self.add_message_tx(conversation_id, message))
            .await?;

        StoredMessage::try_from(row)
    }

    async fn get_conversation_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> TierResult<Vec<StoredMessage>> {
        let rows: Vec<MessageRow> = self
            .timed(
                "get_conversation_messages",
                sqlx::query_as(&format!(
                    r#"
                    SELECT {}
                    FROM messages m
                    WHERE m.conversation_id = $1
                    ORDER BY m.timestamp ASC, m.seq ASC
                    LIMIT $2 OFFSET $3
                    "#,
                    MESSAGE_COLUMNS
                ))
                .bind(conversation_id)
                .bind(limit)
                .bind(offset)
                .fetch_all(&self.pool),
            )
            .await?;

        rows.into_iter().map(StoredMessage::try_from).collect()
    }

    async fn search_messages(
        &self,
        query: &str,
        user_id: Option<Uuid>,
        limit: i64,
    ) -> TierResult<Vec<StoredMessage>> {
        let pattern = format!("%{}%", escape_like(query));

        let rows: Vec<MessageRow> = self
            .timed(
                "search_messages",
                sqlx::query_as(&format!(
                    r#"
                    SELECT {}
                    FROM messages m
                    JOIN conversations c ON c.id = m.conversation_id
                    JOIN sessions s ON s.id = c.session_id
                    WHERE m.content ILIKE $1
                      AND ($2::uuid IS NULL OR s.user_id = $2)
                    ORDER BY m.timestamp DESC, m.seq DESC
                    LIMIT $3
                    "#,
                    MESSAGE_COLUMNS
                ))
                .bind(pattern)
                .bind(user_id)
                .bind(limit)
                .fetch_all(&self.pool),
            )
            .await?;

        rows.into_iter().map(StoredMessage::try_from).collect()
    }

    async fn refresh_message_count(&self, conversation_id: Uuid) -> TierResult<i64> {
        let count: Option<i32> = self
            .timed(
                "refresh_message_count",
                sqlx::query_scalar(
                    r#"
                    UPDATE conversations
                    SET message_count = (
                            SELECT COUNT(*) FROM messages WHERE conversation_id = $1
                        ),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING message_count
                    "#,
                )
                .bind(conversation_id)
                .fetch_optional(&self.pool),
            )
            .await?;

        count
            .map(i64::from)
            .ok_or_else(|| TierError::NotFound(format!("conversation {}", conversation_id)))
    }

    async fn stats(&self) -> TierResult<StoreStats> {
        let (users, sessions, conversations, messages): (i64, i64, i64, i64) = self
            .timed(
                "stats",
                sqlx::query_as(
                    r#"
                    SELECT
                        (SELECT COUNT(*) FROM users),
                        (SELECT COUNT(*) FROM sessions),
                        (SELECT COUNT(*) FROM conversations),
                        (SELECT COUNT(*) FROM messages)
                    "#,
                )
                .fetch_one(&self.pool),
            )
            .await?;

        Ok(StoreStats {
            users,
            sessions,
            conversations,
            messages,
        })
    }
}
