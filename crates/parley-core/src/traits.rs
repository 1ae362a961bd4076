//! Core trait definitions for Parley.
//!
//! These define the contracts between the turn coordinator and its external
//! collaborators. Implementations live in other crates (parley-store for the
//! conversation store, parley-agent for the assistant backend,
//! parley-channels for the messaging gateway).

use crate::tags::Tag;
use crate::types::{
    ChannelHealth, ChatMessage, Contact, ContactKey, MessageReceipt, OutboundContent, Run,
    TenantConfig, ToolCallOutput, ToolDef,
};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Conversation store
// ---------------------------------------------------------------------------

/// Document store holding contacts, their messages, and tenant config.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get_contact(&self, key: &ContactKey) -> Result<Option<Contact>>;

    /// Create the contact if it does not exist yet. Returns the stored
    /// contact; when two writers race, the first one wins and both see it.
    async fn create_contact(&self, contact: Contact) -> Result<Contact>;

    async fn set_thread_id(&self, key: &ContactKey, thread_id: &str) -> Result<()>;

    /// Returns `true` if the tag was added.
    async fn add_tag(&self, key: &ContactKey, tag: &Tag) -> Result<bool>;

    /// Returns `true` if the tag was removed.
    async fn remove_tag(&self, key: &ContactKey, tag: &Tag) -> Result<bool>;

    /// Increment the unread counter, returning the new value.
    async fn increment_unread(&self, key: &ContactKey) -> Result<u32>;

    /// Upsert a message by provider id (last write wins). Returns `true`
    /// if the id was not stored before.
    async fn record_message(&self, key: &ContactKey, message: &ChatMessage) -> Result<bool>;

    /// Most recent messages, oldest first.
    async fn list_messages(&self, key: &ContactKey, limit: usize) -> Result<Vec<ChatMessage>>;

    async fn tenant_config(&self, tenant: &str) -> Result<Option<TenantConfig>>;

    async fn put_tenant_config(&self, tenant: &str, config: &TenantConfig) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Messaging gateway
// ---------------------------------------------------------------------------

/// Outbound side of a chat network.
#[async_trait]
pub trait MessageGateway: Send + Sync {
    /// Unique identifier for this gateway.
    fn id(&self) -> &str;

    async fn send(&self, chat_id: &str, content: OutboundContent) -> Result<MessageReceipt>;

    /// Probe health of this gateway.
    async fn probe(&self) -> ChannelHealth;
}

// ---------------------------------------------------------------------------
// Assistant backend
// ---------------------------------------------------------------------------

/// A stateful LLM assistant service: threads hold the conversation, runs
/// execute the assistant against a thread.
#[async_trait]
pub trait AssistantBackend: Send + Sync {
    /// Backend name (e.g., "openai").
    fn name(&self) -> &str;

    async fn create_thread(&self) -> Result<String>;

    async fn add_message(&self, thread_id: &str, text: &str) -> Result<()>;

    async fn create_run(&self, thread_id: &str, assistant_id: &str, tools: &[ToolDef])
    -> Result<Run>;

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run>;

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        run_id: &str,
        outputs: &[ToolCallOutput],
    ) -> Result<()>;

    /// Text of the newest assistant message on the thread.
    async fn latest_message(&self, thread_id: &str) -> Result<Option<String>>;
}

// ---------------------------------------------------------------------------
// Tool execution
// ---------------------------------------------------------------------------

/// Context available to a tool during execution.
#[derive(Clone)]
#[allow(missing_debug_implementations)]
pub struct ToolContext {
    pub bot_id: String,
    pub contact: ContactKey,
    pub chat_id: String,
    pub tenant: Arc<TenantConfig>,
    pub store: Arc<dyn ConversationStore>,
    pub gateway: Arc<dyn MessageGateway>,
}

/// A side-effecting operation the assistant can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool definition (name, description, parameter schema).
    fn definition(&self) -> ToolDef;

    /// Execute the tool with parsed JSON arguments. Errors are reported to
    /// the assistant as `{"error": ...}` payloads by the registry.
    async fn execute(
        &self,
        arguments: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<serde_json::Value>;
}
