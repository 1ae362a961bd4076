//! Built-in tools every bot can enable.

use std::sync::Arc;

use anyhow::Result;
use futures::FutureExt;
use parley_core::tools::{ToolRegistry, required_str};
use parley_core::{ChatMessage, LeadTemperature, OutboundContent, Tag, ToolContext, ToolDef};
use serde_json::{Value, json};
use tracing::debug;

use crate::assignment::RoundRobin;
use crate::buffer::ChatKey;
use crate::config::SharedConfig;
use crate::followup::FollowupScheduler;

pub(crate) const BUILTIN_TOOLS: &[&str] = &[
    "get_contact",
    "add_tag",
    "remove_tag",
    "set_lead_temperature",
    "send_message",
    "schedule_followup",
    "assign_employee",
    "search_messages",
];

const SEARCH_DEFAULT_LIMIT: u64 = 10;
const SEARCH_MAX_LIMIT: u64 = 50;
const SEARCH_WINDOW: usize = 500;

/// Shared handles the built-in tools close over.
#[allow(missing_debug_implementations)]
pub(crate) struct BotToolkit {
    config: SharedConfig,
    followups: Arc<FollowupScheduler>,
    assignment: Arc<RoundRobin>,
}

impl BotToolkit {
    pub(crate) fn new(
        config: SharedConfig,
        followups: Arc<FollowupScheduler>,
        assignment: Arc<RoundRobin>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            followups,
            assignment,
        })
    }

    /// Registry holding every built-in tool.
    pub(crate) fn registry(self: &Arc<Self>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        for def in Self::defs() {
            let toolkit = Arc::clone(self);
            let name = def.name.clone();
            registry.register_fn(def, move |args, ctx| {
                let toolkit = Arc::clone(&toolkit);
                let name = name.clone();
                async move { toolkit.dispatch(&name, &args, &ctx).await }.boxed()
            });
        }
        registry
    }

    fn defs() -> Vec<ToolDef> {
        vec![
            ToolDef::new(
                "get_contact",
                "Get the current contact's name, phone, tags and conversation state.",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDef::new(
                "add_tag",
                "Add a tag to the current contact.",
                json!({
                    "type": "object",
                    "properties": { "tag": { "type": "string" } },
                    "required": ["tag"]
                }),
            ),
            ToolDef::new(
                "remove_tag",
                "Remove a tag from the current contact.",
                json!({
                    "type": "object",
                    "properties": { "tag": { "type": "string" } },
                    "required": ["tag"]
                }),
            ),
            ToolDef::new(
                "set_lead_temperature",
                "Classify the contact as a cold, medium or hot lead. Replaces any previous classification.",
                json!({
                    "type": "object",
                    "properties": {
                        "temperature": { "type": "string", "enum": ["cold", "medium", "hot"] }
                    },
                    "required": ["temperature"]
                }),
            ),
            ToolDef::new(
                "send_message",
                "Send an additional text message to the contact right away.",
                json!({
                    "type": "object",
                    "properties": { "message": { "type": "string" } },
                    "required": ["message"]
                }),
            ),
            ToolDef::new(
                "schedule_followup",
                "Start a named follow-up sequence for this contact. Replaces any running sequence.",
                json!({
                    "type": "object",
                    "properties": { "sequence": { "type": "string" } },
                    "required": ["sequence"]
                }),
            ),
            ToolDef::new(
                "assign_employee",
                "Hand the contact over to the next available employee.",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDef::new(
                "search_messages",
                "Search this contact's message history (case-insensitive substring).",
                json!({
                    "type": "object",
                    "properties": {
                        "query": { "type": "string" },
                        "limit": { "type": "integer", "minimum": 1, "maximum": SEARCH_MAX_LIMIT }
                    },
                    "required": ["query"]
                }),
            ),
        ]
    }

    async fn dispatch(&self, name: &str, args: &Value, ctx: &ToolContext) -> Result<Value> {
        match name {
            "get_contact" => get_contact(ctx).await,
            "add_tag" => {
                let tag = Tag::parse(required_str(args, "tag")?);
                let added = ctx.store.add_tag(&ctx.contact, &tag).await?;
                Ok(json!({ "tag": tag.to_string(), "added": added }))
            }
            "remove_tag" => {
                let tag = Tag::parse(required_str(args, "tag")?);
                let removed = ctx.store.remove_tag(&ctx.contact, &tag).await?;
                Ok(json!({ "tag": tag.to_string(), "removed": removed }))
            }
            "set_lead_temperature" => {
                let raw = required_str(args, "temperature")?;
                let temperature = LeadTemperature::parse(raw).ok_or_else(|| {
                    anyhow::anyhow!("temperature must be one of cold, medium, hot (got {raw})")
                })?;
                ctx.store
                    .add_tag(&ctx.contact, &Tag::Lead(temperature))
                    .await?;
                Ok(json!({ "temperature": temperature.as_str() }))
            }
            "send_message" => send_message(ctx, required_str(args, "message")?).await,
            "schedule_followup" => self.schedule_followup(ctx, required_str(args, "sequence")?).await,
            "assign_employee" => {
                let employee = self
                    .assignment
                    .assign(ctx.store.as_ref(), &ctx.contact, &ctx.tenant, &[])
                    .await?;
                Ok(match employee {
                    Some(name) => json!({ "assigned": name }),
                    None => json!({ "assigned": null, "reason": "no employees configured" }),
                })
            }
            "search_messages" => search_messages(ctx, args).await,
            other => anyhow::bail!("not a built-in tool: {other}"),
        }
    }

    async fn schedule_followup(&self, ctx: &ToolContext, name: &str) -> Result<Value> {
        let sequence = {
            let config = self.config.load();
            config
                .bot(&ctx.bot_id)
                .and_then(|bot| bot.followup(name))
                .cloned()
        };
        let Some(sequence) = sequence else {
            anyhow::bail!("unknown follow-up sequence: {name}");
        };
        self.followups
            .schedule(
                ChatKey::new(&ctx.bot_id, &ctx.chat_id),
                ctx.contact.clone(),
                &sequence,
            )
            .await?;
        Ok(json!({ "scheduled": sequence.name, "steps": sequence.steps.len() }))
    }
}

async fn get_contact(ctx: &ToolContext) -> Result<Value> {
    let contact = ctx
        .store
        .get_contact(&ctx.contact)
        .await?
        .ok_or_else(|| anyhow::anyhow!("contact not found: {}", ctx.contact))?;
    Ok(json!({
        "phone": contact.key.phone,
        "name": contact.contact_name,
        "tags": contact.tags.to_strings(),
        "lead": contact.tags.lead().map(LeadTemperature::as_str),
        "thread_id": contact.thread_id,
        "unread_count": contact.unread_count,
        "last_message": contact.last_message,
    }))
}

async fn send_message(ctx: &ToolContext, message: &str) -> Result<Value> {
    let content = OutboundContent::text(message);
    let receipt = ctx.gateway.send(&ctx.chat_id, content.clone()).await?;
    let recorded = ChatMessage::outbound(&receipt, &content);
    if let Err(e) = ctx.store.record_message(&ctx.contact, &recorded).await {
        debug!(error = %e, "sent message not persisted");
    }
    Ok(json!({ "sent": true, "id": receipt.id }))
}

async fn search_messages(ctx: &ToolContext, args: &Value) -> Result<Value> {
    let query = required_str(args, "query")?.to_lowercase();
    let limit = args
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(SEARCH_DEFAULT_LIMIT)
        .clamp(1, SEARCH_MAX_LIMIT);
    let limit = usize::try_from(limit).unwrap_or(usize::MAX);

    let messages = ctx.store.list_messages(&ctx.contact, SEARCH_WINDOW).await?;
    let hits: Vec<Value> = messages
        .iter()
        .rev()
        .filter(|m| m.body.to_lowercase().contains(&query))
        .take(limit)
        .map(|m| {
            json!({
                "id": m.id,
                "from_me": m.from_me,
                "body": m.body,
                "timestamp": m.timestamp.to_rfc3339(),
            })
        })
        .collect();
    Ok(json!({ "count": hits.len(), "messages": hits }))
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FollowupSequence, FollowupStep, shared_config};
    use crate::test_support::bot;
    use parley_core::fakes::{FakeGateway, MemoryConversationStore};
    use parley_core::{
        Contact, ContactKey, ConversationStore, MessageGateway, MessageKind, TenantConfig,
    };
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        store: Arc<MemoryConversationStore>,
        gateway: Arc<FakeGateway>,
        followups: Arc<FollowupScheduler>,
        registry: ToolRegistry,
        ctx: ToolContext,
    }

    fn fixture(tenant: TenantConfig) -> Fixture {
        let mut sales = bot("sales");
        sales.followups.push(FollowupSequence {
            name: "nurture".to_owned(),
            steps: vec![FollowupStep {
                after_secs: 60,
                message: "still keen?".to_owned(),
            }],
        });
        let config = shared_config(Config {
            bots: vec![sales],
            ..Config::default()
        });

        let store = Arc::new(MemoryConversationStore::new());
        let gateway = Arc::new(FakeGateway::new());
        let key = ContactKey::new("acme", "+601");
        store.insert_contact(Contact::new(key.clone(), "601@c.us", "Aina"));

        let followups = FollowupScheduler::new(
            Arc::clone(&store) as Arc<dyn ConversationStore>,
            Arc::clone(&gateway) as Arc<dyn MessageGateway>,
            CancellationToken::new(),
        );
        let toolkit = BotToolkit::new(config, Arc::clone(&followups), Arc::new(RoundRobin::new()));
        let ctx = ToolContext {
            bot_id: "sales".to_owned(),
            contact: key,
            chat_id: "601@c.us".to_owned(),
            tenant: Arc::new(tenant),
            store: Arc::clone(&store) as Arc<dyn ConversationStore>,
            gateway: Arc::clone(&gateway) as Arc<dyn MessageGateway>,
        };
        Fixture {
            store,
            gateway,
            followups,
            registry: toolkit.registry(),
            ctx,
        }
    }

    fn tags(f: &Fixture) -> Vec<String> {
        f.store.contact(&f.ctx.contact).unwrap().tags.to_strings()
    }

    #[test]
    fn registry_exposes_every_builtin() {
        let f = fixture(TenantConfig::default());
        let names: Vec<&str> = f.registry.names().collect();
        let mut expected = BUILTIN_TOOLS.to_vec();
        expected.sort_unstable();
        assert_eq!(names, expected);
    }

    #[tokio::test]
    async fn add_and_remove_tag() {
        let f = fixture(TenantConfig::default());
        let out = f.registry.execute("add_tag", r#"{"tag":"VIP"}"#, &f.ctx).await;
        assert_eq!(out, json!({"tag": "VIP", "added": true}));
        let out = f.registry.execute("add_tag", r#"{"tag":"VIP"}"#, &f.ctx).await;
        assert_eq!(out["added"], false);
        assert_eq!(tags(&f), vec!["VIP"]);

        let out = f.registry.execute("remove_tag", r#"{"tag":"VIP"}"#, &f.ctx).await;
        assert_eq!(out["removed"], true);
        let out = f.registry.execute("remove_tag", r#"{"tag":"VIP"}"#, &f.ctx).await;
        assert_eq!(out["removed"], false);
        assert!(tags(&f).is_empty());
    }

    #[tokio::test]
    async fn missing_argument_is_reported() {
        let f = fixture(TenantConfig::default());
        let out = f.registry.execute("add_tag", "{}", &f.ctx).await;
        assert_eq!(out, json!({"error": "missing required parameter: tag"}));
    }

    #[tokio::test]
    async fn lead_temperature_replaces_previous() {
        let f = fixture(TenantConfig::default());
        f.registry
            .execute("set_lead_temperature", r#"{"temperature":"cold"}"#, &f.ctx)
            .await;
        f.registry
            .execute("set_lead_temperature", r#"{"temperature":"HOT"}"#, &f.ctx)
            .await;
        assert_eq!(tags(&f), vec!["hot"]);

        let out = f
            .registry
            .execute("set_lead_temperature", r#"{"temperature":"warm"}"#, &f.ctx)
            .await;
        assert!(out["error"].as_str().unwrap().contains("cold, medium, hot"));
    }

    #[tokio::test]
    async fn get_contact_returns_document() {
        let f = fixture(TenantConfig::default());
        let out = f.registry.execute("get_contact", "", &f.ctx).await;
        assert_eq!(out["phone"], "+601");
        assert_eq!(out["name"], "Aina");
        assert_eq!(out["tags"], json!([]));
    }

    #[tokio::test]
    async fn send_message_sends_and_persists() {
        let f = fixture(TenantConfig::default());
        let out = f
            .registry
            .execute("send_message", r#"{"message":"Here is our menu"}"#, &f.ctx)
            .await;
        assert_eq!(out["sent"], true);
        assert_eq!(f.gateway.sent_texts(), vec!["Here is our menu"]);
        let stored = f.store.messages(&f.ctx.contact);
        assert_eq!(stored.len(), 1);
        assert!(stored[0].from_me);
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_followup_uses_bot_sequence() {
        let f = fixture(TenantConfig::default());
        let out = f
            .registry
            .execute("schedule_followup", r#"{"sequence":"nurture"}"#, &f.ctx)
            .await;
        assert_eq!(out, json!({"scheduled": "nurture", "steps": 1}));
        assert!(tags(&f).contains(&"followup".to_owned()));
        assert_eq!(
            f.followups
                .active_sequence(&ChatKey::new("sales", "601@c.us"))
                .as_deref(),
            Some("nurture")
        );

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(f.gateway.sent_texts(), vec!["still keen?"]);

        let out = f
            .registry
            .execute("schedule_followup", r#"{"sequence":"nope"}"#, &f.ctx)
            .await;
        assert_eq!(out, json!({"error": "unknown follow-up sequence: nope"}));
    }

    #[tokio::test]
    async fn assign_employee_round_robins() {
        let f = fixture(TenantConfig {
            employees: vec!["Ali".to_owned(), "Siti".to_owned()],
            ..TenantConfig::default()
        });
        let out = f.registry.execute("assign_employee", "{}", &f.ctx).await;
        assert_eq!(out, json!({"assigned": "Ali"}));
        let out = f.registry.execute("assign_employee", "{}", &f.ctx).await;
        assert_eq!(out, json!({"assigned": "Siti"}));
    }

    #[tokio::test]
    async fn search_messages_is_case_insensitive_newest_first() {
        let f = fixture(TenantConfig::default());
        for (i, body) in ["Price of sofa?", "thanks", "What's the PRICE now?"]
            .iter()
            .enumerate()
        {
            let message = ChatMessage {
                id: format!("m{i}"),
                from_me: false,
                kind: MessageKind::Text,
                body: (*body).to_owned(),
                media: None,
                timestamp: chrono::Utc::now() + chrono::Duration::seconds(i64::try_from(i).unwrap()),
                quoted_id: None,
                author: None,
            };
            f.store.record_message(&f.ctx.contact, &message).await.unwrap();
        }

        let out = f
            .registry
            .execute("search_messages", r#"{"query":"price"}"#, &f.ctx)
            .await;
        assert_eq!(out["count"], 2);
        assert_eq!(out["messages"][0]["id"], "m2");
        assert_eq!(out["messages"][1]["id"], "m0");

        let out = f
            .registry
            .execute("search_messages", r#"{"query":"price","limit":1}"#, &f.ctx)
            .await;
        assert_eq!(out["count"], 1);
    }
}
