//! Timed nurture sequences sent to a chat until the contact replies.
//!
//! Sequences live in memory only; a restart drops them.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use parley_core::{ChatMessage, ContactKey, ConversationStore, MessageGateway, OutboundContent, Tag};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::buffer::ChatKey;
use crate::config::FollowupSequence;

struct Scheduled {
    id: u64,
    sequence: String,
    token: CancellationToken,
}

#[allow(missing_debug_implementations)]
pub(crate) struct FollowupScheduler {
    store: Arc<dyn ConversationStore>,
    gateway: Arc<dyn MessageGateway>,
    active: Mutex<HashMap<ChatKey, Scheduled>>,
    next_id: AtomicU64,
    shutdown: CancellationToken,
}

impl FollowupScheduler {
    pub(crate) fn new(
        store: Arc<dyn ConversationStore>,
        gateway: Arc<dyn MessageGateway>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            gateway,
            active: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            shutdown,
        })
    }

    /// Start `sequence` for the chat, replacing any running one, and tag
    /// the contact `followup`.
    pub(crate) async fn schedule(
        self: &Arc<Self>,
        chat: ChatKey,
        contact: ContactKey,
        sequence: &FollowupSequence,
    ) -> Result<()> {
        self.cancel(&chat);
        self.store.add_tag(&contact, &Tag::Followup).await?;

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let token = self.shutdown.child_token();
        self.active.lock().expect("followup mutex poisoned").insert(
            chat.clone(),
            Scheduled {
                id,
                sequence: sequence.name.clone(),
                token: token.clone(),
            },
        );

        let span = info_span!("followup", chat = %chat, sequence = %sequence.name);
        let this = Arc::clone(self);
        let steps = sequence.steps.clone();
        tokio::spawn(
            async move {
                info!(steps = steps.len(), "follow-up sequence started");
                for (i, step) in steps.iter().enumerate() {
                    tokio::select! {
                        () = tokio::time::sleep(Duration::from_secs(step.after_secs)) => {}
                        () = token.cancelled() => {
                            debug!(step = i, "follow-up sequence cancelled");
                            return;
                        }
                    }
                    this.send_step(&chat, &contact, &step.message).await;
                }
                this.finish(&chat, &contact, id).await;
            }
            .instrument(span),
        );
        Ok(())
    }

    /// Cancel the chat's running sequence. Returns `true` if one was running.
    pub(crate) fn cancel(&self, chat: &ChatKey) -> bool {
        let removed = self
            .active
            .lock()
            .expect("followup mutex poisoned")
            .remove(chat);
        match removed {
            Some(scheduled) => {
                scheduled.token.cancel();
                info!(chat = %chat, sequence = %scheduled.sequence, "follow-up cancelled");
                true
            }
            None => false,
        }
    }

    /// Name of the sequence running for the chat.
    #[cfg(test)]
    pub(crate) fn active_sequence(&self, chat: &ChatKey) -> Option<String> {
        self.active
            .lock()
            .expect("followup mutex poisoned")
            .get(chat)
            .map(|s| s.sequence.clone())
    }

    async fn send_step(&self, chat: &ChatKey, contact: &ContactKey, message: &str) {
        let content = OutboundContent::text(message);
        match self.gateway.send(&chat.chat_id, content.clone()).await {
            Ok(receipt) => {
                let record = ChatMessage::outbound(&receipt, &content);
                if let Err(e) = self.store.record_message(contact, &record).await {
                    warn!(error = %e, "failed to persist follow-up message");
                }
            }
            Err(e) => warn!(error = %e, "failed to send follow-up message"),
        }
    }

    /// Clear the `followup` tag unless a newer sequence replaced this one.
    async fn finish(&self, chat: &ChatKey, contact: &ContactKey, id: u64) {
        let still_ours = {
            let mut active = self.active.lock().expect("followup mutex poisoned");
            if active.get(chat).is_some_and(|s| s.id == id) {
                active.remove(chat);
                true
            } else {
                false
            }
        };
        if still_ours {
            if let Err(e) = self.store.remove_tag(contact, &Tag::Followup).await {
                warn!(error = %e, "failed to clear followup tag");
            }
            info!("follow-up sequence completed");
        }
    }
}
