use parley_core::{InboundEvent, TagSet, TenantConfig};

use crate::config::BotConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateDecision {
    Respond,
    Drop(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DropReason {
    TenantStopped,
    ContactStopped,
    ChannelStopped,
    OwnEcho,
    SystemEvent,
    GroupNotAddressed,
}

impl DropReason {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::TenantStopped => "tenant stopped",
            Self::ContactStopped => "contact tagged stop bot",
            Self::ChannelStopped => "channel stopped",
            Self::OwnEcho => "own echo",
            Self::SystemEvent => "system event",
            Self::GroupNotAddressed => "group message not addressed to bot",
        }
    }
}

/// Decide whether a turn reaches the assistant. Rules short-circuit in
/// order; the first match wins.
pub(crate) fn evaluate_gate(
    tenant: &TenantConfig,
    tags: &TagSet,
    event: &InboundEvent,
    text: &str,
    bot: &BotConfig,
) -> GateDecision {
    let reason = if tenant.stop_all {
        DropReason::TenantStopped
    } else if tags.is_stopped() {
        DropReason::ContactStopped
    } else if tenant.channel_stopped(event.channel_index) {
        DropReason::ChannelStopped
    } else if event.from_me {
        DropReason::OwnEcho
    } else if is_system_chat(event.chat_id()) {
        DropReason::SystemEvent
    } else if event.is_group() && !group_addressed(text, event.channel_index, bot) {
        DropReason::GroupNotAddressed
    } else {
        return GateDecision::Respond;
    };
    GateDecision::Drop(reason)
}

/// Broadcast lists and status updates are never conversations.
fn is_system_chat(chat_id: &str) -> bool {
    chat_id.ends_with("@broadcast")
}

/// A group message is answered only when it starts with the bot's mention
/// prefix and arrives on the primary line.
fn group_addressed(text: &str, channel_index: u32, bot: &BotConfig) -> bool {
    if channel_index != bot.primary_channel {
        return false;
    }
    let Some(prefix) = bot.mention_prefix.as_deref() else {
        return false;
    };
    starts_with_mention(text, prefix)
}

pub(crate) fn starts_with_mention(text: &str, prefix: &str) -> bool {
    let prefix = prefix.trim().to_lowercase();
    !prefix.is_empty() && text.trim_start().to_lowercase().starts_with(&prefix)
}
