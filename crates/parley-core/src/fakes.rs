//! Fake implementations for testing.
#![allow(clippy::unwrap_used)]

use crate::tags::Tag;
use crate::traits::{AssistantBackend, ConversationStore, MessageGateway, Tool, ToolContext};
use crate::types::{
    ChannelHealth, ChatMessage, Contact, ContactKey, MessageReceipt, OutboundContent, Run,
    RunStatus, TenantConfig, ToolCall, ToolCallOutput, ToolDef,
};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ---------------------------------------------------------------------------
// MemoryConversationStore
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct StoredContact {
    contact: Option<Contact>,
    messages: BTreeMap<String, ChatMessage>,
}

/// In-memory conversation store for testing.
#[derive(Debug, Default)]
pub struct MemoryConversationStore {
    contacts: Mutex<HashMap<ContactKey, StoredContact>>,
    tenants: Mutex<HashMap<String, TenantConfig>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a contact directly, bypassing create-if-absent.
    pub fn insert_contact(&self, contact: Contact) {
        let key = contact.key.clone();
        self.contacts
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .contact = Some(contact);
    }

    pub fn contact(&self, key: &ContactKey) -> Option<Contact> {
        self.contacts
            .lock()
            .unwrap()
            .get(key)
            .and_then(|c| c.contact.clone())
    }

    pub fn messages(&self, key: &ContactKey) -> Vec<ChatMessage> {
        let mut messages: Vec<_> = self
            .contacts
            .lock()
            .unwrap()
            .get(key)
            .map(|c| c.messages.values().cloned().collect())
            .unwrap_or_default();
        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    pub fn set_tenant(&self, tenant: &str, config: TenantConfig) {
        self.tenants
            .lock()
            .unwrap()
            .insert(tenant.to_owned(), config);
    }

    fn with_contact<T>(&self, key: &ContactKey, f: impl FnOnce(&mut Contact) -> T) -> Result<T> {
        let mut contacts = self.contacts.lock().unwrap();
        let contact = contacts
            .get_mut(key)
            .and_then(|c| c.contact.as_mut())
            .ok_or_else(|| anyhow::anyhow!("contact not found: {key}"))?;
        contact.updated_at = Utc::now();
        Ok(f(contact))
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn get_contact(&self, key: &ContactKey) -> Result<Option<Contact>> {
        Ok(self.contact(key))
    }

    async fn create_contact(&self, contact: Contact) -> Result<Contact> {
        let mut contacts = self.contacts.lock().unwrap();
        let entry = contacts.entry(contact.key.clone()).or_default();
        Ok(entry.contact.get_or_insert(contact).clone())
    }

    async fn set_thread_id(&self, key: &ContactKey, thread_id: &str) -> Result<()> {
        self.with_contact(key, |c| c.thread_id = Some(thread_id.to_owned()))
    }

    async fn add_tag(&self, key: &ContactKey, tag: &Tag) -> Result<bool> {
        self.with_contact(key, |c| c.tags.insert(tag.clone()))
    }

    async fn remove_tag(&self, key: &ContactKey, tag: &Tag) -> Result<bool> {
        self.with_contact(key, |c| c.tags.remove(tag))
    }

    async fn increment_unread(&self, key: &ContactKey) -> Result<u32> {
        self.with_contact(key, |c| {
            c.unread_count += 1;
            c.unread_count
        })
    }

    async fn record_message(&self, key: &ContactKey, message: &ChatMessage) -> Result<bool> {
        let mut contacts = self.contacts.lock().unwrap();
        let entry = contacts.entry(key.clone()).or_default();
        if let Some(contact) = entry.contact.as_mut() {
            contact.last_message = Some(message.body.clone());
        }
        Ok(entry
            .messages
            .insert(message.id.clone(), message.clone())
            .is_none())
    }

    async fn list_messages(&self, key: &ContactKey, limit: usize) -> Result<Vec<ChatMessage>> {
        let messages = self.messages(key);
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.into_iter().skip(skip).collect())
    }

    async fn tenant_config(&self, tenant: &str) -> Result<Option<TenantConfig>> {
        Ok(self.tenants.lock().unwrap().get(tenant).cloned())
    }

    async fn put_tenant_config(&self, tenant: &str, config: &TenantConfig) -> Result<()> {
        self.set_tenant(tenant, config.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeGateway
// ---------------------------------------------------------------------------

/// Fake gateway that records every send.
#[derive(Debug, Default)]
pub struct FakeGateway {
    sent: Mutex<Vec<(String, OutboundContent)>>,
    counter: AtomicUsize,
    fail: Mutex<bool>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }

    pub fn sent(&self) -> Vec<(String, OutboundContent)> {
        self.sent.lock().unwrap().clone()
    }

    /// Text of every sent message, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, content)| content.text_content().to_owned())
            .collect()
    }
}

#[async_trait]
impl MessageGateway for FakeGateway {
    fn id(&self) -> &str {
        "fake"
    }

    async fn send(&self, chat_id: &str, content: OutboundContent) -> Result<MessageReceipt> {
        if *self.fail.lock().unwrap() {
            anyhow::bail!("gateway unavailable");
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap()
            .push((chat_id.to_owned(), content));
        Ok(MessageReceipt {
            id: format!("out-{n}"),
            timestamp: Utc::now(),
            ack: 1,
        })
    }

    async fn probe(&self) -> ChannelHealth {
        ChannelHealth::Healthy
    }
}

// ---------------------------------------------------------------------------
// ScriptedAssistant
// ---------------------------------------------------------------------------

/// Fake assistant backend. `get_run` replays scripted statuses in order and
/// then repeats the fallback step forever.
#[derive(Debug)]
pub struct ScriptedAssistant {
    reply: Mutex<String>,
    script: Mutex<VecDeque<(RunStatus, Vec<ToolCall>)>>,
    fallback: Mutex<(RunStatus, Vec<ToolCall>)>,
    threads_created: AtomicUsize,
    runs_created: AtomicUsize,
    polls: AtomicUsize,
    messages: Mutex<Vec<(String, String)>>,
    submissions: Mutex<Vec<Vec<ToolCallOutput>>>,
}

impl ScriptedAssistant {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: Mutex::new(reply.into()),
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new((RunStatus::Completed, Vec::new())),
            threads_created: AtomicUsize::new(0),
            runs_created: AtomicUsize::new(0),
            polls: AtomicUsize::new(0),
            messages: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn push_step(&self, status: RunStatus, tool_calls: Vec<ToolCall>) {
        self.script
            .lock()
            .unwrap()
            .push_back((status, tool_calls));
    }

    pub fn set_fallback(&self, status: RunStatus, tool_calls: Vec<ToolCall>) {
        *self.fallback.lock().unwrap() = (status, tool_calls);
    }

    pub fn set_reply(&self, reply: impl Into<String>) {
        *self.reply.lock().unwrap() = reply.into();
    }

    pub fn threads_created(&self) -> usize {
        self.threads_created.load(Ordering::SeqCst)
    }

    pub fn runs_created(&self) -> usize {
        self.runs_created.load(Ordering::SeqCst)
    }

    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    /// `(thread_id, text)` for every user message added.
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn submissions(&self) -> Vec<Vec<ToolCallOutput>> {
        self.submissions.lock().unwrap().clone()
    }
}

#[async_trait]
impl AssistantBackend for ScriptedAssistant {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn create_thread(&self) -> Result<String> {
        let n = self.threads_created.fetch_add(1, Ordering::SeqCst);
        Ok(format!("thread-{n}"))
    }

    async fn add_message(&self, thread_id: &str, text: &str) -> Result<()> {
        self.messages
            .lock()
            .unwrap()
            .push((thread_id.to_owned(), text.to_owned()));
        Ok(())
    }

    async fn create_run(
        &self,
        thread_id: &str,
        _assistant_id: &str,
        _tools: &[ToolDef],
    ) -> Result<Run> {
        let n = self.runs_created.fetch_add(1, Ordering::SeqCst);
        Ok(Run {
            id: format!("run-{n}"),
            thread_id: thread_id.to_owned(),
            status: RunStatus::Queued,
            tool_calls: Vec::new(),
        })
    }

    async fn get_run(&self, thread_id: &str, run_id: &str) -> Result<Run> {
        self.polls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        let (status, tool_calls) = next.unwrap_or_else(|| self.fallback.lock().unwrap().clone());
        Ok(Run {
            id: run_id.to_owned(),
            thread_id: thread_id.to_owned(),
            status,
            tool_calls,
        })
    }

    async fn submit_tool_outputs(
        &self,
        _thread_id: &str,
        _run_id: &str,
        outputs: &[ToolCallOutput],
    ) -> Result<()> {
        self.submissions.lock().unwrap().push(outputs.to_vec());
        Ok(())
    }

    async fn latest_message(&self, _thread_id: &str) -> Result<Option<String>> {
        Ok(Some(self.reply.lock().unwrap().clone()))
    }
}

// ---------------------------------------------------------------------------
// FakeTool
// ---------------------------------------------------------------------------

/// Fake tool returning a fixed output.
#[derive(Debug)]
pub struct FakeTool {
    pub def: ToolDef,
    pub output: Mutex<serde_json::Value>,
    pub calls: AtomicUsize,
}

impl FakeTool {
    pub fn new(name: impl Into<String>, output: serde_json::Value) -> Self {
        Self {
            def: ToolDef::new(name, "A fake tool", serde_json::json!({"type": "object"})),
            output: Mutex::new(output),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Tool for FakeTool {
    fn definition(&self) -> ToolDef {
        self.def.clone()
    }

    async fn execute(
        &self,
        _arguments: serde_json::Value,
        _ctx: &ToolContext,
    ) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.lock().unwrap().clone())
    }
}

/// A tool context backed by fresh in-memory fakes.
pub fn tool_context() -> ToolContext {
    ToolContext {
        bot_id: "bot".to_owned(),
        contact: ContactKey::new("tenant", "+60123456789"),
        chat_id: "60123456789@c.us".to_owned(),
        tenant: Arc::new(TenantConfig::default()),
        store: Arc::new(MemoryConversationStore::new()),
        gateway: Arc::new(FakeGateway::new()),
    }
}
