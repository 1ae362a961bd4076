use anyhow::Result;
use parley_core::{ChatMessage, Contact, ContactKey, TagSet, TenantConfig};
use rusqlite::{OptionalExtension, params};
use tracing::debug;

use super::SqliteConversationStore;
use super::helpers::{
    CONTACT_COLUMNS, contact_from_row, media_to_json, ms_from_dt, now_ms, tags_from_json,
    tags_to_json,
};

pub(super) fn create_contact(store: &SqliteConversationStore, contact: &Contact) -> Result<Contact> {
    let conn = store.conn.lock().expect("conversation db mutex poisoned");
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO contacts (
            tenant_id, phone, chat_id, contact_name, tags, thread_id,
            unread_count, last_message, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            contact.key.tenant,
            contact.key.phone,
            contact.chat_id,
            contact.contact_name,
            tags_to_json(&contact.tags),
            contact.thread_id,
            contact.unread_count,
            contact.last_message,
            ms_from_dt(contact.created_at),
            ms_from_dt(contact.updated_at),
        ],
    )?;
    if inserted == 0 {
        debug!(contact = %contact.key, "contact already exists, keeping stored copy");
    }

    let stored = conn.query_row(
        &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE tenant_id = ?1 AND phone = ?2"),
        params![contact.key.tenant, contact.key.phone],
        contact_from_row,
    )?;
    Ok(stored)
}

pub(super) fn set_thread_id(
    store: &SqliteConversationStore,
    key: &ContactKey,
    thread_id: &str,
) -> Result<()> {
    let conn = store.conn.lock().expect("conversation db mutex poisoned");
    let updated = conn.execute(
        "UPDATE contacts SET thread_id = ?3, updated_at = ?4 WHERE tenant_id = ?1 AND phone = ?2",
        params![key.tenant, key.phone, thread_id, now_ms()],
    )?;
    anyhow::ensure!(updated == 1, "contact not found: {key}");
    Ok(())
}

/// Read-modify-write of the tag set inside one transaction. `apply`
/// returns whether it changed anything; unchanged sets are not written.
pub(super) fn update_tags(
    store: &SqliteConversationStore,
    key: &ContactKey,
    apply: impl FnOnce(&mut TagSet) -> bool,
) -> Result<bool> {
    let mut conn = store.conn.lock().expect("conversation db mutex poisoned");
    let tx = conn.transaction()?;

    let raw: Option<String> = tx
        .query_row(
            "SELECT tags FROM contacts WHERE tenant_id = ?1 AND phone = ?2",
            params![key.tenant, key.phone],
            |row| row.get(0),
        )
        .optional()?;
    let Some(raw) = raw else {
        anyhow::bail!("contact not found: {key}");
    };

    let mut tags = tags_from_json(&raw);
    let changed = apply(&mut tags);
    if changed {
        tx.execute(
            "UPDATE contacts SET tags = ?3, updated_at = ?4 WHERE tenant_id = ?1 AND phone = ?2",
            params![key.tenant, key.phone, tags_to_json(&tags), now_ms()],
        )?;
    }
    tx.commit()?;
    Ok(changed)
}

pub(super) fn increment_unread(store: &SqliteConversationStore, key: &ContactKey) -> Result<u32> {
    let conn = store.conn.lock().expect("conversation db mutex poisoned");
    let count: Option<u32> = conn
        .query_row(
            "UPDATE contacts SET unread_count = unread_count + 1, updated_at = ?3
             WHERE tenant_id = ?1 AND phone = ?2
             RETURNING unread_count",
            params![key.tenant, key.phone, now_ms()],
            |row| row.get(0),
        )
        .optional()?;
    count.ok_or_else(|| anyhow::anyhow!("contact not found: {key}"))
}

pub(super) fn record_message(
    store: &SqliteConversationStore,
    key: &ContactKey,
    message: &ChatMessage,
) -> Result<bool> {
    let mut conn = store.conn.lock().expect("conversation db mutex poisoned");
    let tx = conn.transaction()?;

    let existed = tx
        .query_row(
            "SELECT 1 FROM messages WHERE tenant_id = ?1 AND phone = ?2 AND id = ?3",
            params![key.tenant, key.phone, message.id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();

    tx.execute(
        "INSERT INTO messages (
            tenant_id, phone, id, from_me, kind, body, media, timestamp, quoted_id, author
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(tenant_id, phone, id) DO UPDATE SET
            from_me = excluded.from_me,
            kind = excluded.kind,
            body = excluded.body,
            media = excluded.media,
            timestamp = excluded.timestamp,
            quoted_id = excluded.quoted_id,
            author = excluded.author",
        params![
            key.tenant,
            key.phone,
            message.id,
            message.from_me,
            message.kind.as_str(),
            message.body,
            media_to_json(message.media.as_ref()),
            ms_from_dt(message.timestamp),
            message.quoted_id,
            message.author,
        ],
    )?;

    tx.execute(
        "UPDATE contacts SET last_message = ?3, updated_at = ?4 WHERE tenant_id = ?1 AND phone = ?2",
        params![key.tenant, key.phone, message.body, now_ms()],
    )?;
    tx.commit()?;

    if existed {
        debug!(message_id = %message.id, "message already stored, fields overwritten");
    }
    Ok(!existed)
}

pub(super) fn put_tenant_config(
    store: &SqliteConversationStore,
    tenant: &str,
    config: &TenantConfig,
) -> Result<()> {
    let document = serde_json::to_string(config)?;
    let conn = store.conn.lock().expect("conversation db mutex poisoned");
    conn.execute(
        "INSERT INTO tenant_configs (tenant_id, document, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(tenant_id) DO UPDATE SET
            document = excluded.document,
            updated_at = excluded.updated_at",
        params![tenant, document, now_ms()],
    )?;
    Ok(())
}
