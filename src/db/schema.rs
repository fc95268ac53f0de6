//! Database schema and migrations

use rusqlite::Connection;

use crate::Result;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 3;

/// Initialize the database schema
///
/// # Errors
///
/// Returns error if migration fails
pub fn init(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .unwrap_or(0);

    if version < 1 {
        migrate_v1(conn)?;
    }
    if version < 2 {
        migrate_v2(conn)?;
    }
    if version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Connected messaging accounts, one per platform per tenant.
        -- credentials and session_data are opaque JSON blobs owned by the
        -- settings flow; the pipeline only refreshes session_data.
        CREATE TABLE IF NOT EXISTS integrations (
            id TEXT PRIMARY KEY,
            platform TEXT NOT NULL CHECK(platform IN ('telegram_business', 'instagram')),
            is_active INTEGER NOT NULL DEFAULT 1,
            ai_enabled INTEGER NOT NULL DEFAULT 1,
            system_prompt TEXT,
            knowledge_base_url TEXT,
            credentials TEXT NOT NULL DEFAULT '{}',
            session_data TEXT NOT NULL DEFAULT '{}',
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_integrations_platform
            ON integrations(platform, is_active);

        -- One conversation per external contact per integration. The unique
        -- key makes find-or-create an atomic upsert.
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            integration_id TEXT NOT NULL REFERENCES integrations(id),
            external_chat_id TEXT NOT NULL,
            customer_name TEXT,
            status TEXT NOT NULL DEFAULT 'new',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            last_message_at TEXT,
            UNIQUE(integration_id, external_chat_id)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_integration
            ON conversations(integration_id);

        -- Append-only message log.
        CREATE TABLE IF NOT EXISTS messages (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL REFERENCES conversations(id),
            sender TEXT NOT NULL CHECK(sender IN ('customer', 'assistant', 'operator')),
            content TEXT NOT NULL,
            provider_message_id TEXT,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(conversation_id);

        -- Dedup backstop: a provider message id may be stored at most once
        -- per conversation among customer messages.
        CREATE UNIQUE INDEX IF NOT EXISTS idx_messages_provider_dedup
            ON messages(conversation_id, provider_message_id)
            WHERE sender = 'customer' AND provider_message_id IS NOT NULL;

        PRAGMA user_version = 1;
        ",
    )?;

    tracing::info!("migrated to schema v1");
    Ok(())
}

fn migrate_v2(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Aggregate lead profile, merged field-wise from message extractions
        ALTER TABLE conversations ADD COLUMN lead_profile TEXT;
        ALTER TABLE conversations ADD COLUMN lead_profile_updated_at TEXT;

        PRAGMA user_version = 2;
        ",
    )?;

    tracing::info!("migrated to schema v2");
    Ok(())
}

fn migrate_v3(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r"
        -- Reference pair for the live waiting-call notification message
        ALTER TABLE conversations ADD COLUMN waiting_call_chat_id TEXT;
        ALTER TABLE conversations ADD COLUMN waiting_call_message_id INTEGER;

        PRAGMA user_version = 3;
        ",
    )?;

    tracing::info!("migrated to schema v3");
    Ok(())
}
