use chrono::{DateTime, TimeZone, Utc};
use parley_core::{ChatMessage, Contact, ContactKey, MediaDescriptor, MessageKind, TagSet};
use rusqlite::Row;

pub(super) const CONTACT_COLUMNS: &str = "tenant_id, phone, chat_id, contact_name, tags, \
     thread_id, unread_count, last_message, created_at, updated_at";

pub(super) const MESSAGE_COLUMNS: &str =
    "id, from_me, kind, body, media, timestamp, quoted_id, author";

pub(super) fn contact_from_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    let tags: String = row.get(4)?;
    Ok(Contact {
        key: ContactKey {
            tenant: row.get(0)?,
            phone: row.get(1)?,
        },
        chat_id: row.get(2)?,
        contact_name: row.get(3)?,
        tags: tags_from_json(&tags),
        thread_id: row.get(5)?,
        unread_count: row.get(6)?,
        last_message: row.get(7)?,
        created_at: dt_from_ms(row.get(8)?),
        updated_at: dt_from_ms(row.get(9)?),
    })
}

pub(super) fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let kind: String = row.get(2)?;
    let media: Option<String> = row.get(4)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        from_me: row.get(1)?,
        kind: MessageKind::from_provider(&kind),
        body: row.get(3)?,
        media: media.and_then(|raw| serde_json::from_str::<MediaDescriptor>(&raw).ok()),
        timestamp: dt_from_ms(row.get(5)?),
        quoted_id: row.get(6)?,
        author: row.get(7)?,
    })
}

pub(super) fn tags_to_json(tags: &TagSet) -> String {
    serde_json::to_string(tags).unwrap_or_else(|_| "[]".to_owned())
}

pub(super) fn tags_from_json(raw: &str) -> TagSet {
    serde_json::from_str(raw).unwrap_or_default()
}

pub(super) fn media_to_json(media: Option<&MediaDescriptor>) -> Option<String> {
    media.and_then(|m| serde_json::to_string(m).ok())
}

pub(super) fn ms_from_dt(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

pub(super) fn dt_from_ms(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or_else(Utc::now)
}

pub(super) fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}
