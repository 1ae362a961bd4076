use chrono::Utc;
use parley_core::{InboundEvent, MessageKind};

use crate::config::{BotConfig, Templates};

/// A text message from `chat` to the bot's line.
pub(crate) fn inbound(id: &str, chat: &str, body: &str) -> InboundEvent {
    InboundEvent {
        id: id.to_owned(),
        from: chat.to_owned(),
        to: "60100000000@c.us".to_owned(),
        body: body.to_owned(),
        kind: MessageKind::Text,
        has_media: false,
        media: None,
        from_me: false,
        timestamp: Utc::now(),
        notify_name: Some("Aina".to_owned()),
        contact_name: None,
        author: None,
        quoted_id: None,
        channel_index: 0,
    }
}

pub(crate) fn bot(id: &str) -> BotConfig {
    BotConfig {
        id: id.to_owned(),
        tenant_id: "acme".to_owned(),
        debounce_secs: 30,
        primary_channel: 0,
        mention_prefix: None,
        assistant_id: None,
        tools: Vec::new(),
        templates: Templates::default(),
        triggers: Vec::new(),
        followups: Vec::new(),
    }
}
