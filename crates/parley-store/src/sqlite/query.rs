use anyhow::{Context, Result};
use parley_core::{ChatMessage, Contact, ContactKey, TenantConfig};
use rusqlite::{OptionalExtension, params};

use super::SqliteConversationStore;
use super::helpers::{CONTACT_COLUMNS, MESSAGE_COLUMNS, contact_from_row, message_from_row};

pub(super) fn get_contact(
    store: &SqliteConversationStore,
    key: &ContactKey,
) -> Result<Option<Contact>> {
    let conn = store.conn.lock().expect("conversation db mutex poisoned");
    let contact = conn
        .query_row(
            &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE tenant_id = ?1 AND phone = ?2"),
            params![key.tenant, key.phone],
            contact_from_row,
        )
        .optional()?;
    Ok(contact)
}

pub(super) fn list_messages(
    store: &SqliteConversationStore,
    key: &ContactKey,
    limit: usize,
) -> Result<Vec<ChatMessage>> {
    let conn = store.conn.lock().expect("conversation db mutex poisoned");
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages
         WHERE tenant_id = ?1 AND phone = ?2
         ORDER BY timestamp DESC, rowid DESC
         LIMIT ?3"
    ))?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let mut messages = stmt
        .query_map(params![key.tenant, key.phone, limit], message_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    messages.reverse();
    Ok(messages)
}

pub(super) fn tenant_config(
    store: &SqliteConversationStore,
    tenant: &str,
) -> Result<Option<TenantConfig>> {
    let conn = store.conn.lock().expect("conversation db mutex poisoned");
    let document: Option<String> = conn
        .query_row(
            "SELECT document FROM tenant_configs WHERE tenant_id = ?1",
            params![tenant],
            |row| row.get(0),
        )
        .optional()?;
    drop(conn);

    document
        .map(|raw| {
            serde_json::from_str(&raw)
                .with_context(|| format!("invalid config document for tenant {tenant}"))
        })
        .transpose()
}
