//! Message repository
//!
//! Messages are an append-only log. Customer rows carry the
//! provider-assigned message id used for dedup; a partial unique index on
//! (conversation, provider id) backs up the pipeline's dedup guard.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use crate::{Error, Result};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSender {
    Customer,
    Assistant,
    Operator,
}

impl MessageSender {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Assistant => "assistant",
            Self::Operator => "operator",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(Self::Customer),
            "assistant" => Some(Self::Assistant),
            "operator" => Some(Self::Operator),
            _ => None,
        }
    }
}

/// A log entry in a conversation
#[derive(Debug, Clone)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: MessageSender,
    pub content: String,
    pub provider_message_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Message repository
#[derive(Clone)]
pub struct MessageRepo {
    pool: DbPool,
}

impl MessageRepo {
    /// Create a new message repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Append a message and bump the conversation's last-activity timestamp
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails; a unique-index violation
    /// on the provider id surfaces as [`Error::Sqlite`] and can be
    /// classified with [`is_unique_violation`]
    pub fn append(
        &self,
        conversation_id: &str,
        sender: MessageSender,
        content: &str,
        provider_message_id: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<Message> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        let now_str = now.to_rfc3339();

        conn.execute(
            "INSERT INTO messages
                (id, conversation_id, sender, content, provider_message_id, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            rusqlite::params![
                id,
                conversation_id,
                sender.as_str(),
                content,
                provider_message_id,
                metadata.to_string(),
                now_str,
            ],
        )?;

        conn.execute(
            "UPDATE conversations SET last_message_at = ?1 WHERE id = ?2",
            [&now_str, conversation_id],
        )?;

        Ok(Message {
            id,
            conversation_id: conversation_id.to_string(),
            sender,
            content: content.to_string(),
            provider_message_id: provider_message_id.map(String::from),
            metadata: metadata.clone(),
            created_at: now,
        })
    }

    /// Provider id of the most recent customer message, if any
    ///
    /// This is the dedup guard's comparison value.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn last_customer_provider_id(&self, conversation_id: &str) -> Result<Option<String>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            "SELECT provider_message_id FROM messages
             WHERE conversation_id = ?1 AND sender = 'customer'
             ORDER BY created_at DESC, rowid DESC LIMIT 1",
            [conversation_id],
            |row| row.get::<_, Option<String>>(0),
        );

        match result {
            Ok(id) => Ok(id),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Most recent messages in chronological order
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT id, conversation_id, sender, content, provider_message_id, metadata, created_at
             FROM messages WHERE conversation_id = ?1
             ORDER BY created_at DESC, rowid DESC LIMIT ?2",
        )?;

        #[allow(clippy::cast_possible_wrap)]
        let messages: Vec<Message> = stmt
            .query_map(rusqlite::params![conversation_id, limit as i64], parse_row)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(messages.into_iter().rev().collect())
    }

    /// Count messages in a conversation
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn count(&self, conversation_id: &str) -> Result<usize> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            [conversation_id],
            |row| row.get(0),
        )?;

        Ok(usize::try_from(count).unwrap_or(0))
    }
}

/// Whether an append failed because the provider id was already stored
#[must_use]
pub fn is_unique_violation(error: &Error) -> bool {
    matches!(
        error,
        Error::Sqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let sender: String = row.get(2)?;
    let metadata: String = row.get(5)?;

    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender: MessageSender::from_str(&sender).unwrap_or(MessageSender::Customer),
        content: row.get(3)?,
        provider_message_id: row.get(4)?,
        metadata: serde_json::from_str(&metadata).unwrap_or_else(|_| serde_json::json!({})),
        created_at: parse_datetime(&row.get::<_, String>(6)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
