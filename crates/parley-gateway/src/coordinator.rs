//! Turn coordinator: ingest inbound events, debounce them into turns and
//! answer each turn through the assistant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use parley_core::phone::normalize_phone;
use parley_core::reply::split_reply;
use parley_core::tools::ToolRegistry;
use parley_core::{
    AssistantBackend, ChatMessage, Contact, ContactKey, ConversationStore, InboundEvent,
    MessageGateway, OutboundContent, Tag, TenantConfig, ToolContext,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::assignment::RoundRobin;
use crate::buffer::{ChatKey, MessageBuffer, Turn};
use crate::config::{BotConfig, SharedConfig, TriggerAction, TriggerRule};
use crate::followup::FollowupScheduler;
use crate::gating::{DropReason, GateDecision, evaluate_gate};
use crate::run_loop::{RunLimits, RunOutcome, drive_run};
use crate::triggers::TriggerMatcher;

/// External collaborators shared by every bot.
#[allow(missing_debug_implementations)]
pub(crate) struct Services {
    pub store: Arc<dyn ConversationStore>,
    pub gateway: Arc<dyn MessageGateway>,
    pub assistant: Arc<dyn AssistantBackend>,
    pub tools: Arc<ToolRegistry>,
    pub followups: Arc<FollowupScheduler>,
    pub assignment: Arc<RoundRobin>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum IngestOutcome {
    Buffered,
    Duplicate,
    OwnEcho,
    UnknownBot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TurnOutcome {
    Replied { parts: usize },
    Gated(DropReason),
    Skipped(&'static str),
    Cancelled,
    Failed,
}

type ChatLock = Arc<tokio::sync::Mutex<()>>;

#[allow(missing_debug_implementations)]
pub(crate) struct Coordinator {
    config: SharedConfig,
    services: Services,
    buffer: MessageBuffer,
    in_flight: Mutex<HashMap<ChatKey, ChatLock>>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub(crate) fn new(
        config: SharedConfig,
        services: Services,
        shutdown: CancellationToken,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Turn>) {
        let (buffer, turns) = MessageBuffer::new();
        let coordinator = Arc::new(Self {
            config,
            services,
            buffer,
            in_flight: Mutex::new(HashMap::new()),
            shutdown,
        });
        (coordinator, turns)
    }

    /// Persist an inbound event and queue it for the chat's next turn.
    pub(crate) async fn ingest(&self, bot_id: &str, event: InboundEvent) -> Result<IngestOutcome> {
        let config = self.config.load_full();
        let Some(bot) = config.bot(bot_id) else {
            return Ok(IngestOutcome::UnknownBot);
        };
        let key = contact_key(bot, event.chat_id());
        let store = &self.services.store;

        self.ensure_contact(&key, &event).await?;
        if !store.record_message(&key, &event.to_chat_message()).await? {
            debug!(message = %event.id, "duplicate delivery, not buffered");
            return Ok(IngestOutcome::Duplicate);
        }
        if event.from_me {
            return Ok(IngestOutcome::OwnEcho);
        }
        if let Err(e) = store.increment_unread(&key).await {
            warn!(contact = %key, error = %e, "failed to bump unread count");
        }

        let chat = ChatKey::new(bot_id, event.chat_id());
        self.buffer.push(chat, event, bot.debounce());
        Ok(IngestOutcome::Buffered)
    }

    /// Dispatch loop: every debounced turn runs on its own task.
    pub(crate) async fn run_turns(self: Arc<Self>, mut turns: mpsc::UnboundedReceiver<Turn>) {
        loop {
            tokio::select! {
                () = self.shutdown.cancelled() => break,
                turn = turns.recv() => {
                    let Some(turn) = turn else { break };
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        this.handle_turn(turn).await;
                    });
                }
            }
        }
        info!(pending = self.buffer.pending_chats(), "turn dispatcher stopped");
    }

    /// Answer one merged turn. Errors are logged and swallowed.
    pub(crate) async fn handle_turn(&self, turn: Turn) -> TurnOutcome {
        let span = info_span!("turn", chat = %turn.key, parts = turn.parts);
        async {
            let lock = self.chat_lock(&turn.key);
            let outcome = {
                let _guard = lock.lock().await;
                match self.process_turn(&turn).await {
                    Ok(outcome) => {
                        debug!(?outcome, "turn finished");
                        outcome
                    }
                    Err(e) => {
                        error!(error = %format!("{e:#}"), "turn failed");
                        TurnOutcome::Failed
                    }
                }
            };
            self.release_chat_lock(&turn.key, lock);
            outcome
        }
        .instrument(span)
        .await
    }

    fn chat_lock(&self, chat: &ChatKey) -> ChatLock {
        let mut in_flight = self.in_flight.lock().expect("in-flight mutex poisoned");
        Arc::clone(in_flight.entry(chat.clone()).or_default())
    }

    /// Drop the chat's lock entry unless another turn is holding or
    /// waiting on it.
    fn release_chat_lock(&self, chat: &ChatKey, lock: ChatLock) {
        let mut in_flight = self.in_flight.lock().expect("in-flight mutex poisoned");
        // One reference in the map, one here.
        if Arc::strong_count(&lock) == 2 {
            in_flight.remove(chat);
        }
    }

    async fn process_turn(&self, turn: &Turn) -> Result<TurnOutcome> {
        let config = self.config.load_full();
        let Some(bot) = config.bot(&turn.key.bot) else {
            warn!("bot no longer configured");
            return Ok(TurnOutcome::Skipped("unknown bot"));
        };
        let store = &self.services.store;
        let tenant = Arc::new(self.tenant_config(&bot.tenant_id).await);

        let key = contact_key(bot, &turn.key.chat_id);
        let contact = self.ensure_contact(&key, &turn.first).await?;
        let thread_id = self.ensure_thread(&contact).await?;

        // Snooze only sits out of this evaluation; the stored tag stays.
        let mut tags = contact.tags;
        if tags.take_snooze() {
            debug!("snooze tag ignored for this turn");
        }

        if let GateDecision::Drop(reason) =
            evaluate_gate(&tenant, &tags, &turn.first, &turn.text, bot)
        {
            info!(reason = reason.as_str(), "turn not answered");
            return Ok(TurnOutcome::Gated(reason));
        }

        if tags.contains(&Tag::Followup) {
            self.services.followups.cancel(&turn.key);
            if let Err(e) = store.remove_tag(&key, &Tag::Followup).await {
                warn!(error = %e, "failed to clear followup tag");
            }
        }

        if turn.text.trim().is_empty() {
            debug!("turn has no text");
            return Ok(TurnOutcome::Skipped("empty turn"));
        }

        let Some(assistant_id) = tenant
            .assistant_for(&tags, turn.first.channel_index)
            .or(bot.assistant_id.as_deref())
            .map(ToOwned::to_owned)
        else {
            warn!(tenant = %bot.tenant_id, "no assistant configured");
            return Ok(TurnOutcome::Skipped("no assistant"));
        };

        let ctx = ToolContext {
            bot_id: bot.id.clone(),
            contact: key,
            chat_id: turn.key.chat_id.clone(),
            tenant,
            store: Arc::clone(store),
            gateway: Arc::clone(&self.services.gateway),
        };

        let reply = match self
            .ask_assistant(bot, &ctx, &thread_id, &assistant_id, &turn.text)
            .await
        {
            Ok(RunOutcome::Reply(text)) => text,
            Ok(RunOutcome::Cancelled) => return Ok(TurnOutcome::Cancelled),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "assistant run failed");
                bot.templates.run_trouble.clone()
            }
        };

        let parts = self.send_reply(bot, &ctx, &reply).await;
        Ok(TurnOutcome::Replied { parts })
    }

    async fn ask_assistant(
        &self,
        bot: &BotConfig,
        ctx: &ToolContext,
        thread_id: &str,
        assistant_id: &str,
        text: &str,
    ) -> Result<RunOutcome> {
        let assistant = self.services.assistant.as_ref();
        let tools = self.services.tools.as_ref();
        let limits = RunLimits::from(&self.config.load().assistant);

        assistant.add_message(thread_id, text).await?;
        let run = assistant
            .create_run(thread_id, assistant_id, &tools.definitions(&bot.tools))
            .await?;
        info!(run = %run.id, assistant = %assistant_id, "run started");
        drive_run(
            assistant,
            tools,
            ctx,
            &run,
            limits,
            &bot.templates,
            &self.shutdown,
        )
        .await
    }

    /// Send each reply part in order, persisting it before the next send.
    /// Returns the number of parts delivered.
    async fn send_reply(&self, bot: &BotConfig, ctx: &ToolContext, reply: &str) -> usize {
        let mut triggers = TriggerMatcher::new(&bot.triggers);
        let mut sent = 0;
        for part in split_reply(reply) {
            let content = OutboundContent::text(part.as_str());
            let receipt = match self.services.gateway.send(&ctx.chat_id, content.clone()).await {
                Ok(receipt) => receipt,
                Err(e) => {
                    warn!(error = %e, "failed to send reply part");
                    continue;
                }
            };
            sent += 1;
            let record = ChatMessage::outbound(&receipt, &content);
            if let Err(e) = self.services.store.record_message(&ctx.contact, &record).await {
                warn!(error = %e, "failed to persist reply part");
            }
            for rule in triggers.matches(&part) {
                self.apply_trigger(bot, ctx, rule).await;
            }
        }
        sent
    }

    async fn apply_trigger(&self, bot: &BotConfig, ctx: &ToolContext, rule: &TriggerRule) {
        let store = self.services.store.as_ref();
        let result = match rule.action {
            TriggerAction::AssignEmployee => self
                .services
                .assignment
                .assign(store, &ctx.contact, &ctx.tenant, &rule.tags)
                .await
                .map(drop),
            TriggerAction::ScheduleFollowup => {
                match rule.sequence.as_deref().and_then(|name| bot.followup(name)) {
                    Some(sequence) => {
                        self.services
                            .followups
                            .schedule(
                                ChatKey::new(&bot.id, &ctx.chat_id),
                                ctx.contact.clone(),
                                sequence,
                            )
                            .await
                    }
                    None => Err(anyhow::anyhow!("follow-up sequence not configured")),
                }
            }
            TriggerAction::AddTags => update_tags(store, &ctx.contact, &rule.tags, true).await,
            TriggerAction::RemoveTags => update_tags(store, &ctx.contact, &rule.tags, false).await,
        };
        match result {
            Ok(()) => info!(phrase = %rule.phrase, action = ?rule.action, "trigger fired"),
            Err(e) => warn!(phrase = %rule.phrase, error = %e, "trigger action failed"),
        }
    }

    async fn tenant_config(&self, tenant: &str) -> TenantConfig {
        match self.services.store.tenant_config(tenant).await {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!(tenant, "no tenant config stored, using defaults");
                TenantConfig::default()
            }
            Err(e) => {
                warn!(tenant, error = %e, "failed to load tenant config, using defaults");
                TenantConfig::default()
            }
        }
    }

    async fn ensure_contact(&self, key: &ContactKey, event: &InboundEvent) -> Result<Contact> {
        let store = &self.services.store;
        if let Some(contact) = store.get_contact(key).await? {
            return Ok(contact);
        }
        // Stored name wins; then pushname, then the address book name.
        let name = [event.notify_name.as_deref(), event.contact_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|name| !name.is_empty())
            .unwrap_or(&key.phone);
        let contact = store
            .create_contact(Contact::new(key.clone(), event.chat_id(), name))
            .await?;
        info!(contact = %key, "contact created");
        Ok(contact)
    }

    /// Thread id for the contact, allocated and persisted on first use.
    async fn ensure_thread(&self, contact: &Contact) -> Result<String> {
        if let Some(id) = contact.thread_id.as_deref().filter(|id| !id.is_empty()) {
            return Ok(id.to_owned());
        }
        let id = self.services.assistant.create_thread().await?;
        self.services.store.set_thread_id(&contact.key, &id).await?;
        info!(thread = %id, "thread allocated");
        Ok(id)
    }
}

/// Contact key for a chat. Group chats key on the normalized group id.
fn contact_key(bot: &BotConfig, chat_id: &str) -> ContactKey {
    ContactKey::new(&bot.tenant_id, normalize_phone(chat_id))
}

async fn update_tags(
    store: &dyn ConversationStore,
    contact: &ContactKey,
    tags: &[String],
    add: bool,
) -> Result<()> {
    for tag in tags {
        let tag = Tag::parse(tag);
        if add {
            store.add_tag(contact, &tag).await?;
        } else {
            store.remove_tag(contact, &tag).await?;
        }
    }
    Ok(())
}
