//! Integration repository
//!
//! Integrations are created and edited by the settings flow; the pipeline
//! reads them and only writes back session state (business-connection ids,
//! refreshed Instagram session blobs).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::DbPool;
use crate::event::Platform;
use crate::{Error, Result};

/// A connected messaging account for one tenant
#[derive(Debug, Clone)]
pub struct Integration {
    pub id: String,
    pub platform: Platform,
    pub is_active: bool,
    pub ai_enabled: bool,
    pub system_prompt: Option<String>,
    pub knowledge_base_url: Option<String>,
    /// Opaque credential blob owned by the settings flow (bot token,
    /// Instagram login/session id)
    pub credentials: serde_json::Value,
    /// Opaque session blob (Telegram business-connection id, Instagram
    /// cookie state); refreshed by the pipeline after sends/polls
    pub session_data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

impl Integration {
    /// Create an active integration with empty blobs
    #[must_use]
    pub fn new(platform: Platform) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            platform,
            is_active: true,
            ai_enabled: true,
            system_prompt: None,
            knowledge_base_url: None,
            credentials: serde_json::json!({}),
            session_data: serde_json::json!({}),
            updated_at: Utc::now(),
        }
    }

    /// Telegram bot token from the credential blob
    #[must_use]
    pub fn bot_token(&self) -> Option<&str> {
        self.credentials.get("bot_token").and_then(|v| v.as_str())
    }

    /// Business-connection id persisted from a connection lifecycle update
    #[must_use]
    pub fn business_connection_id(&self) -> Option<&str> {
        self.session_data
            .get("business_connection_id")
            .and_then(|v| v.as_str())
    }
}

/// Integration repository
#[derive(Clone)]
pub struct IntegrationRepo {
    pool: DbPool,
}

impl IntegrationRepo {
    /// Create a new integration repository
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Insert an integration (settings flow / test seeding)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn insert(&self, integration: &Integration) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "INSERT INTO integrations
                (id, platform, is_active, ai_enabled, system_prompt, knowledge_base_url,
                 credentials, session_data, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                integration.id,
                integration.platform.as_str(),
                i32::from(integration.is_active),
                i32::from(integration.ai_enabled),
                integration.system_prompt,
                integration.knowledge_base_url,
                integration.credentials.to_string(),
                integration.session_data.to_string(),
                integration.updated_at.to_rfc3339(),
            ],
        )?;

        Ok(())
    }

    /// Get an integration by id
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get(&self, id: &str) -> Result<Option<Integration>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            &format!("SELECT {COLUMNS} FROM integrations WHERE id = ?1"),
            [id],
            parse_row,
        );

        match result {
            Ok(integration) => Ok(Some(integration)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Get an active integration by id and platform
    ///
    /// Used by the webhook adapter: an update addressed to an unknown,
    /// inactive, or wrong-platform integration is irrelevant payload.
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn get_active(&self, id: &str, platform: Platform) -> Result<Option<Integration>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let result = conn.query_row(
            &format!(
                "SELECT {COLUMNS} FROM integrations
                 WHERE id = ?1 AND platform = ?2 AND is_active = 1"
            ),
            [id, platform.as_str()],
            parse_row,
        );

        match result {
            Ok(integration) => Ok(Some(integration)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// List active integrations for a platform (poll sweep input)
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn list_active(&self, platform: Platform) -> Result<Vec<Integration>> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {COLUMNS} FROM integrations
             WHERE platform = ?1 AND is_active = 1
             ORDER BY updated_at DESC"
        ))?;

        let integrations = stmt
            .query_map([platform.as_str()], parse_row)?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(integrations)
    }

    /// Replace the session blob after a send/poll rotated state
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails
    pub fn update_session_data(&self, id: &str, session_data: &serde_json::Value) -> Result<()> {
        let conn = self.pool.get().map_err(|e| Error::Database(e.to_string()))?;

        conn.execute(
            "UPDATE integrations SET session_data = ?1, updated_at = ?2 WHERE id = ?3",
            rusqlite::params![session_data.to_string(), Utc::now().to_rfc3339(), id],
        )?;

        Ok(())
    }

    /// Merge a business-connection id into the session blob
    ///
    /// # Errors
    ///
    /// Returns error if database operation fails or the integration is gone
    pub fn set_business_connection(&self, id: &str, connection_id: &str) -> Result<()> {
        let Some(integration) = self.get(id)? else {
            return Err(Error::NotFound(format!("integration {id}")));
        };

        let mut session_data = integration.session_data;
        if !session_data.is_object() {
            session_data = serde_json::json!({});
        }
        session_data["business_connection_id"] = serde_json::Value::String(connection_id.into());

        self.update_session_data(id, &session_data)
    }
}

const COLUMNS: &str = "id, platform, is_active, ai_enabled, system_prompt, knowledge_base_url, \
                       credentials, session_data, updated_at";

fn parse_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Integration> {
    let platform: String = row.get(1)?;
    let credentials: String = row.get(6)?;
    let session_data: String = row.get(7)?;

    Ok(Integration {
        id: row.get(0)?,
        platform: Platform::parse(&platform).unwrap_or(Platform::TelegramBusiness),
        is_active: row.get::<_, i32>(2)? != 0,
        ai_enabled: row.get::<_, i32>(3)? != 0,
        system_prompt: row.get(4)?,
        knowledge_base_url: row.get(5)?,
        credentials: serde_json::from_str(&credentials)
            .unwrap_or_else(|_| serde_json::json!({})),
        session_data: serde_json::from_str(&session_data)
            .unwrap_or_else(|_| serde_json::json!({})),
        updated_at: parse_datetime(&row.get::<_, String>(8)?),
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
