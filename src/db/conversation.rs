//! Conversation repository
//!
//! One row per (integration, external chat id). Creation goes through a
//! single upsert against the unique key, so concurrent first contacts for
//! the same external id collapse into one conversation.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use crate::lead::LeadProfile;
use crate::status::ConversationStatus;
use crate::{Error, Result};

/// A durable conversation with one external contact
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub integration_id: String,
    pub external_chat_id: String,
    pub customer_name: Option<String>,
    pub status: ConversationStatus,
    pub lead_profile: LeadProfile,
    /// Chat id of the live waiting-call notification message, if one exists
    pub waiting_call_chat_id: Option<String>,
    /// Message id of the live waiting-call notification message
    pub waiting_call_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub last_message_at: Option<DateTime<Utc>>,
}

/// Conversation repository
#[derive(Clone)]
pub struct ConversationRepo {
    pool: DbPool,
}

impl ConversationRepo {
    /// Create a new conversation repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Find or create the conversation for an external contact
    ///
    /// The insert is a single `INSERT OR IGNORE` against the unique
    /// (integration, external chat id) key followed by a read-back, never a
    /// check-then-insert, so two concurrent first contacts cannot create
    /// two rows.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn find_or_create(
        &self,
        integration_id: &str,
        external_chat_id: &str,
        customer_name: &str,
    ) -> Result<Conversation> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO conversations
                (id, integration_id, external_chat_id, customer_name, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(integration_id, external_chat_id) DO NOTHING",
            rusqlite::params![
                id,
                integration_id,
                external_chat_id,
                customer_name,
                ConversationStatus::initial().as_str(),
                now,
            ],
        )?;

        conn.query_row(
            &format!(
                "SELECT {COLUMNS} FROM conversations
                 WHERE integration_id = ?1 AND external_chat_id = ?2"
            ),
            [integration_id, external_chat_id],
            parse_row,
        )
        .map_err(Into::into)
    }

    /// Get a conversation by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            &format!("SELECT {COLUMNS} FROM conversations WHERE id = ?1"),
            [id],
            parse_row,
        );

        match result {
            Ok(conversation) => Ok(Some(conversation)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set the conversation status
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn update_status(&self, id: &str, status: ConversationStatus) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "UPDATE conversations SET status = ?1 WHERE id = ?2",
            [status.as_str(), id],
        )?;

        Ok(())
    }

    /// Persist the merged lead profile
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn update_lead_profile(&self, id: &str, profile: &LeadProfile) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let json = serde_json::to_string(profile)?;
        conn.execute(
            "UPDATE conversations
             SET lead_profile = ?1, lead_profile_updated_at = ?2
             WHERE id = ?3",
            rusqlite::params![json, Utc::now().to_rfc3339(), id],
        )?;

        Ok(())
    }

    /// Remember where the live waiting-call notification message lives
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn set_waiting_call_ref(&self, id: &str, chat_id: &str, message_id: i64) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "UPDATE conversations
             SET waiting_call_chat_id = ?1, waiting_call_message_id = ?2
             WHERE id = ?3",
            rusqlite::params![chat_id, message_id, id],
        )?;

        Ok(())
    }
}

const COLUMNS: &str = "id, integration_id, external_chat_id, customer_name, status, \
                       lead_profile, waiting_call_chat_id, waiting_call_message_id, \
                       created_at, last_message_at";

fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(4)?;
    let lead_profile: Option<String> = row.get(5)?;

    Ok(Conversation {
        id: row.get(0)?,
        integration_id: row.get(1)?,
        external_chat_id: row.get(2)?,
        customer_name: row.get(3)?,
        status: ConversationStatus::parse(&status).unwrap_or(ConversationStatus::New),
        lead_profile: lead_profile
            .and_then(|json| serde_json::from_str(&json).ok())
            .unwrap_or_default(),
        waiting_call_chat_id: row.get(6)?,
        waiting_call_message_id: row.get(7)?,
        created_at: parse_datetime(&row.get::<_, String>(8)?),
        last_message_at: row
            .get::<_, Option<String>>(9)?
            .map(|s| parse_datetime(&s)),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::db::{Integration, IntegrationRepo};
    use crate::event::Platform;

    fn seed_integration(pool: &DbPool) -> Integration {
        let integration = Integration::new(Platform::TelegramBusiness);
        IntegrationRepo::new(pool.clone()).insert(&integration).unwrap();
        integration
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let pool = db::init_memory().unwrap();
        let integration = seed_integration(&pool);
        let repo = ConversationRepo::new(pool);

        let first = repo
            .find_or_create(&integration.id, "chat-1", "Алексей")
            .unwrap();
        assert_eq!(first.status, ConversationStatus::New);
        assert_eq!(first.customer_name.as_deref(), Some("Алексей"));

        let second = repo
            .find_or_create(&integration.id, "chat-1", "Алексей")
            .unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn concurrent_first_contacts_create_one_row() {
        let dir = tempfile::tempdir().unwrap();
        let pool = db::init(dir.path().join("sellio.db")).unwrap();
        let integration = seed_integration(&pool);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = ConversationRepo::new(pool.clone());
            let integration_id = integration.id.clone();
            handles.push(std::thread::spawn(move || {
                repo.find_or_create(&integration_id, "chat-racy", "Гость").unwrap().id
            }));
        }

        let ids: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM conversations WHERE external_chat_id = 'chat-racy'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn status_and_profile_updates_round_trip() {
        let pool = db::init_memory().unwrap();
        let integration = seed_integration(&pool);
        let repo = ConversationRepo::new(pool);

        let conversation = repo
            .find_or_create(&integration.id, "chat-2", "Мария")
            .unwrap();

        repo.update_status(&conversation.id, ConversationStatus::WaitingCall)
            .unwrap();

        let mut profile = LeadProfile::default();
        profile.phone = Some("+998901112233".into());
        repo.update_lead_profile(&conversation.id, &profile).unwrap();

        repo.set_waiting_call_ref(&conversation.id, "-100555", 77).unwrap();

        let loaded = repo.get(&conversation.id).unwrap().unwrap();
        assert_eq!(loaded.status, ConversationStatus::WaitingCall);
        assert_eq!(loaded.lead_profile.phone.as_deref(), Some("+998901112233"));
        assert_eq!(loaded.waiting_call_chat_id.as_deref(), Some("-100555"));
        assert_eq!(loaded.waiting_call_message_id, Some(77));
    }
}
