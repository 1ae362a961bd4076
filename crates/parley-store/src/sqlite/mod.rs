mod helpers;
mod query;
mod schema;
mod write_ops;


use anyhow::Result;
use async_trait::async_trait;
use parley_core::{ChatMessage, Contact, ContactKey, ConversationStore, Tag, TenantConfig};
use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;
use tracing::instrument;

/// SQLite-backed conversation store.
pub struct SqliteConversationStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteConversationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConversationStore")
            .finish_non_exhaustive()
    }
}

impl SqliteConversationStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA busy_timeout = 5000;
            ",
        )?;
        schema::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    #[cfg(test)]
    fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

#[async_trait]
impl ConversationStore for SqliteConversationStore {
    #[instrument(skip(self), fields(contact = %key))]
    async fn get_contact(&self, key: &ContactKey) -> Result<Option<Contact>> {
        query::get_contact(self, key)
    }

    #[instrument(skip(self, contact), fields(contact = %contact.key))]
    async fn create_contact(&self, contact: Contact) -> Result<Contact> {
        write_ops::create_contact(self, &contact)
    }

    #[instrument(skip(self), fields(contact = %key))]
    async fn set_thread_id(&self, key: &ContactKey, thread_id: &str) -> Result<()> {
        write_ops::set_thread_id(self, key, thread_id)
    }

    #[instrument(skip(self), fields(contact = %key, tag = %tag))]
    async fn add_tag(&self, key: &ContactKey, tag: &Tag) -> Result<bool> {
        write_ops::update_tags(self, key, |tags| tags.insert(tag.clone()))
    }

    #[instrument(skip(self), fields(contact = %key, tag = %tag))]
    async fn remove_tag(&self, key: &ContactKey, tag: &Tag) -> Result<bool> {
        write_ops::update_tags(self, key, |tags| tags.remove(tag))
    }

    #[instrument(skip(self), fields(contact = %key))]
    async fn increment_unread(&self, key: &ContactKey) -> Result<u32> {
        write_ops::increment_unread(self, key)
    }

    #[instrument(skip(self, message), fields(contact = %key, message_id = %message.id))]
    async fn record_message(&self, key: &ContactKey, message: &ChatMessage) -> Result<bool> {
        write_ops::record_message(self, key, message)
    }

    #[instrument(skip(self), fields(contact = %key))]
    async fn list_messages(&self, key: &ContactKey, limit: usize) -> Result<Vec<ChatMessage>> {
        query::list_messages(self, key, limit)
    }

    #[instrument(skip(self))]
    async fn tenant_config(&self, tenant: &str) -> Result<Option<TenantConfig>> {
        query::tenant_config(self, tenant)
    }

    #[instrument(skip(self, config))]
    async fn put_tenant_config(&self, tenant: &str, config: &TenantConfig) -> Result<()> {
        write_ops::put_tenant_config(self, tenant, config)
    }
}
