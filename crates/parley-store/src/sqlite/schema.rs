use anyhow::Result;
use rusqlite::Connection;

/// Logical layout: `companies/{tenant}/contacts/{phone}` with a
/// `messages/{id}` child collection, plus one config document per tenant.
pub(super) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS contacts (
            tenant_id TEXT NOT NULL,
            phone TEXT NOT NULL,
            chat_id TEXT NOT NULL,
            contact_name TEXT NOT NULL,
            tags TEXT NOT NULL DEFAULT '[]',
            thread_id TEXT,
            unread_count INTEGER NOT NULL DEFAULT 0,
            last_message TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            PRIMARY KEY (tenant_id, phone)
        );

        CREATE TABLE IF NOT EXISTS messages (
            tenant_id TEXT NOT NULL,
            phone TEXT NOT NULL,
            id TEXT NOT NULL,
            from_me INTEGER NOT NULL,
            kind TEXT NOT NULL,
            body TEXT NOT NULL,
            media TEXT,
            timestamp INTEGER NOT NULL,
            quoted_id TEXT,
            author TEXT,
            PRIMARY KEY (tenant_id, phone, id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_time
            ON messages(tenant_id, phone, timestamp);

        CREATE TABLE IF NOT EXISTS tenant_configs (
            tenant_id TEXT PRIMARY KEY,
            document TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        );
        ",
    )?;
    Ok(())
}
