use chrono::{DateTime, TimeZone, Utc};
use parley_core::{InboundEvent, MediaDescriptor, MessageKind};
use serde::Deserialize;
use tracing::debug;

/// Sender address of WhatsApp status broadcasts.
const STATUS_BROADCAST: &str = "status@broadcast";

/// Provider message types that carry protocol/system noise, never user
/// text.
const SYSTEM_TYPES: &[&str] = &[
    "e2e_notification",
    "notification_template",
    "notification",
    "gp2",
    "protocol",
    "call_log",
    "revoked",
    "ciphertext",
];

/// Provider message object as delivered by the bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMessage {
    pub id: String,
    pub from: String,
    #[serde(default)]
    pub to: String,
    #[serde(default)]
    pub body: String,
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,
    #[serde(default)]
    pub has_media: bool,
    #[serde(default)]
    pub from_me: bool,
    /// Seconds (or milliseconds) since the epoch.
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub notify_name: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub quoted_msg_id: Option<String>,
    #[serde(default)]
    pub channel_index: Option<u32>,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub filename: Option<String>,
}

fn default_type() -> String {
    "chat".to_owned()
}

/// Webhook request body: either a bare message or an event envelope.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum WebhookBody {
    Envelope {
        event: String,
        payload: ProviderMessage,
    },
    Bare(ProviderMessage),
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundDecision {
    Accept(Box<InboundEvent>),
    Filtered(&'static str),
}

/// Turn a webhook body into an inbound event, or say why it was dropped.
pub fn classify_webhook(body: WebhookBody, default_channel: u32) -> InboundDecision {
    let message = match body {
        WebhookBody::Envelope { event, payload } => {
            if !matches!(event.as_str(), "message" | "message.any") {
                debug!(event = %event, "ignoring non-message webhook event");
                return InboundDecision::Filtered("event");
            }
            payload
        }
        WebhookBody::Bare(message) => message,
    };

    if message.from == STATUS_BROADCAST || message.to == STATUS_BROADCAST {
        return InboundDecision::Filtered("status broadcast");
    }
    if is_system_type(&message.kind) {
        return InboundDecision::Filtered("system message");
    }

    InboundDecision::Accept(Box::new(inbound_from_provider(message, default_channel)))
}

fn is_system_type(kind: &str) -> bool {
    SYSTEM_TYPES.contains(&kind)
}

fn inbound_from_provider(message: ProviderMessage, default_channel: u32) -> InboundEvent {
    let media = message
        .has_media
        .then(|| message.mimetype.clone())
        .flatten()
        .map(|mimetype| MediaDescriptor {
            mimetype,
            filename: message.filename.clone(),
        });

    InboundEvent {
        id: message.id,
        from: message.from,
        to: message.to,
        body: message.body,
        kind: MessageKind::from_provider(&message.kind),
        has_media: message.has_media,
        media,
        from_me: message.from_me,
        timestamp: timestamp_from_provider(message.timestamp),
        notify_name: message.notify_name.filter(|n| !n.trim().is_empty()),
        contact_name: message.contact_name.filter(|n| !n.trim().is_empty()),
        author: message.author,
        quoted_id: message.quoted_msg_id,
        channel_index: message.channel_index.unwrap_or(default_channel),
    }
}

/// Bridges disagree on seconds vs. milliseconds; anything past year 33658
/// in seconds is treated as milliseconds. Zero means "now".
fn timestamp_from_provider(raw: i64) -> DateTime<Utc> {
    if raw <= 0 {
        return Utc::now();
    }
    let parsed = if raw > 1_000_000_000_000 {
        Utc.timestamp_millis_opt(raw)
    } else {
        Utc.timestamp_opt(raw, 0)
    };
    parsed.single().unwrap_or_else(Utc::now)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bare(value: serde_json::Value) -> WebhookBody {
        serde_json::from_value(value).unwrap()
    }

    fn accepted(decision: InboundDecision) -> InboundEvent {
        match decision {
            InboundDecision::Accept(event) => *event,
            InboundDecision::Filtered(reason) => panic!("unexpectedly filtered: {reason}"),
        }
    }

    #[test]
    fn parses_bare_chat_message() {
        let body = bare(json!({
            "id": "false_60123456789@c.us_3EB0",
            "from": "60123456789@c.us",
            "to": "60111111111@c.us",
            "body": "hi",
            "type": "chat",
            "hasMedia": false,
            "fromMe": false,
            "timestamp": 1_700_000_000,
            "notifyName": "Aina"
        }));

        let event = accepted(classify_webhook(body, 0));
        assert_eq!(event.body, "hi");
        assert_eq!(event.kind, MessageKind::Text);
        assert_eq!(event.notify_name.as_deref(), Some("Aina"));
        assert_eq!(event.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(event.channel_index, 0);
    }

    #[test]
    fn parses_event_envelope() {
        let body = bare(json!({
            "event": "message",
            "session": "default",
            "payload": {
                "id": "m1",
                "from": "60123456789@c.us",
                "body": "hello",
                "contactName": "Aina (Kedai)",
                "channelIndex": 2
            }
        }));

        let event = accepted(classify_webhook(body, 0));
        assert_eq!(event.id, "m1");
        assert_eq!(event.notify_name, None);
        assert_eq!(event.contact_name.as_deref(), Some("Aina (Kedai)"));
        assert_eq!(event.channel_index, 2);
    }

    #[test]
    fn filters_non_message_events() {
        let body = bare(json!({
            "event": "message.ack",
            "payload": { "id": "m1", "from": "60123456789@c.us" }
        }));
        assert_eq!(classify_webhook(body, 0), InboundDecision::Filtered("event"));
    }

    #[test]
    fn filters_status_broadcasts() {
        let body = bare(json!({ "id": "s1", "from": "status@broadcast", "body": "story" }));
        assert_eq!(
            classify_webhook(body, 0),
            InboundDecision::Filtered("status broadcast")
        );
    }

    #[test]
    fn filters_system_types() {
        for kind in ["e2e_notification", "gp2", "protocol", "revoked"] {
            let body = bare(json!({ "id": "x", "from": "60123456789@c.us", "type": kind }));
            assert_eq!(
                classify_webhook(body, 0),
                InboundDecision::Filtered("system message"),
                "type {kind} should be filtered"
            );
        }
    }

    #[test]
    fn media_descriptor_requires_has_media() {
        let body = bare(json!({
            "id": "img",
            "from": "60123456789@c.us",
            "type": "image",
            "hasMedia": true,
            "mimetype": "image/jpeg",
            "filename": "menu.jpg"
        }));
        let event = accepted(classify_webhook(body, 0));
        assert_eq!(event.kind, MessageKind::Image);
        assert_eq!(event.media.unwrap().mimetype, "image/jpeg");
    }

    #[test]
    fn millisecond_timestamps_are_detected() {
        assert_eq!(
            timestamp_from_provider(1_700_000_000_123).timestamp(),
            1_700_000_000
        );
    }
}
