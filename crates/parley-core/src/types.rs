use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::tags::TagSet;

/// Identifies a contact: which tenant + which normalized phone number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContactKey {
    pub tenant: String,
    pub phone: String,
}

impl ContactKey {
    pub fn new(tenant: impl Into<String>, phone: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            phone: phone.into(),
        }
    }
}

impl fmt::Display for ContactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.phone)
    }
}

/// One contact per (tenant, phone number).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub key: ContactKey,
    pub chat_id: String,
    pub contact_name: String,
    #[serde(default)]
    pub tags: TagSet,
    #[serde(default)]
    pub thread_id: Option<String>,
    #[serde(default)]
    pub unread_count: u32,
    #[serde(default)]
    pub last_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(key: ContactKey, chat_id: impl Into<String>, contact_name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            key,
            chat_id: chat_id.into(),
            contact_name: contact_name.into(),
            tags: TagSet::new(),
            thread_id: None,
            unread_count: 0,
            last_message: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Kind of chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Audio,
    Video,
    Document,
    Other,
}

impl MessageKind {
    /// Map a provider message type onto a kind. Provider text messages are
    /// called `chat`; voice notes are `ptt`.
    pub fn from_provider(value: &str) -> Self {
        match value {
            "chat" | "text" => MessageKind::Text,
            "image" => MessageKind::Image,
            "audio" | "ptt" => MessageKind::Audio,
            "video" => MessageKind::Video,
            "document" => MessageKind::Document,
            _ => MessageKind::Other,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Audio => "audio",
            MessageKind::Video => "video",
            MessageKind::Document => "document",
            MessageKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub mimetype: String,
    #[serde(default)]
    pub filename: Option<String>,
}

/// A stored chat message, keyed by provider message id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub from_me: bool,
    pub kind: MessageKind,
    pub body: String,
    #[serde(default)]
    pub media: Option<MediaDescriptor>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub quoted_id: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl ChatMessage {
    /// An outbound message built from a gateway receipt.
    pub fn outbound(receipt: &MessageReceipt, content: &OutboundContent) -> Self {
        let (kind, body, media) = match content {
            OutboundContent::Text(text) => (MessageKind::Text, text.clone(), None),
            OutboundContent::Media(media) => (
                media_kind(&media.mimetype),
                media.caption.clone().unwrap_or_default(),
                Some(MediaDescriptor {
                    mimetype: media.mimetype.clone(),
                    filename: media.filename.clone(),
                }),
            ),
        };
        Self {
            id: receipt.id.clone(),
            from_me: true,
            kind,
            body,
            media,
            timestamp: receipt.timestamp,
            quoted_id: None,
            author: None,
        }
    }
}

fn media_kind(mimetype: &str) -> MessageKind {
    match mimetype.split('/').next() {
        Some("image") => MessageKind::Image,
        Some("audio") => MessageKind::Audio,
        Some("video") => MessageKind::Video,
        _ => MessageKind::Document,
    }
}

/// An inbound event from the messaging network, after provider-specific
/// parsing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    pub from: String,
    pub to: String,
    pub body: String,
    pub kind: MessageKind,
    pub has_media: bool,
    #[serde(default)]
    pub media: Option<MediaDescriptor>,
    pub from_me: bool,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub notify_name: Option<String>,
    /// Name saved in the line's address book, when the bridge sends one.
    #[serde(default)]
    pub contact_name: Option<String>,
    /// Real sender inside a group chat.
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub quoted_id: Option<String>,
    /// Which of the tenant's lines received the message.
    #[serde(default)]
    pub channel_index: u32,
}

impl InboundEvent {
    /// The chat this event belongs to. Our own echoes are addressed *to*
    /// the chat.
    pub fn chat_id(&self) -> &str {
        if self.from_me { &self.to } else { &self.from }
    }

    pub fn is_group(&self) -> bool {
        crate::phone::is_group_chat(self.chat_id())
    }

    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            id: self.id.clone(),
            from_me: self.from_me,
            kind: self.kind,
            body: self.body.clone(),
            media: self.media.clone(),
            timestamp: self.timestamp,
            quoted_id: self.quoted_id.clone(),
            author: self.author.clone(),
        }
    }
}

/// Media attachment to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaAttachment {
    pub mimetype: String,
    /// Base64-encoded payload.
    pub data: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub caption: Option<String>,
}

/// Content of an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboundContent {
    Text(String),
    Media(MediaAttachment),
}

impl OutboundContent {
    pub fn text(content: impl Into<String>) -> Self {
        OutboundContent::Text(content.into())
    }

    /// Text or caption carried by the content.
    pub fn text_content(&self) -> &str {
        match self {
            OutboundContent::Text(text) => text,
            OutboundContent::Media(media) => media.caption.as_deref().unwrap_or_default(),
        }
    }
}

/// Delivery acknowledgement returned by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub ack: i32,
}

/// Health status of a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ChannelHealth {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

/// Per-tenant runtime configuration document.
///
/// Loaded from the store once per turn and passed down as an immutable
/// snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantConfig {
    #[serde(default)]
    pub assistant_id: Option<String>,
    /// Assistant override per channel index.
    #[serde(default)]
    pub channel_assistants: BTreeMap<u32, String>,
    /// Assistant override per contact tag.
    #[serde(default)]
    pub tag_assistants: BTreeMap<String, String>,
    /// Tenant-wide kill switch.
    #[serde(default, rename = "stopbot")]
    pub stop_all: bool,
    /// Per-line kill switch, keyed by channel index.
    #[serde(default, rename = "stopbots")]
    pub stopped_channels: BTreeMap<u32, bool>,
    /// Employees eligible for round-robin lead assignment.
    #[serde(default)]
    pub employees: Vec<String>,
}

impl TenantConfig {
    pub fn channel_stopped(&self, channel_index: u32) -> bool {
        self.stopped_channels
            .get(&channel_index)
            .copied()
            .unwrap_or(false)
    }

    /// Pick the assistant for a contact: tag variant, then channel variant,
    /// then the tenant default.
    pub fn assistant_for(&self, tags: &TagSet, channel_index: u32) -> Option<&str> {
        tags.iter()
            .find_map(|tag| self.tag_assistants.get(&tag.to_string()))
            .or_else(|| self.channel_assistants.get(&channel_index))
            .or(self.assistant_id.as_ref())
            .map(String::as_str)
    }
}

/// Status of an assistant run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::InProgress => "in_progress",
            RunStatus::RequiresAction => "requires_action",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Expired => "expired",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw JSON arguments as sent by the backend.
    pub arguments: String,
}

/// One request/response cycle against an assistant thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub thread_id: String,
    pub status: RunStatus,
    /// Populated when `status` is `RequiresAction`.
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

/// Output for one tool call, submitted back to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallOutput {
    pub call_id: String,
    pub output: String,
}

/// Tool definition exposed to the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDef {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}
