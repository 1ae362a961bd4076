//! Sliding-window debounce that merges bursts of messages into one turn.
//!
//! Each chat has at most one live timer. A new message for the chat aborts
//! the pending timer and starts a fresh one; when a timer survives its quiet
//! period the entry is removed and a [`Turn`] is emitted on the channel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use parley_core::InboundEvent;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span};

/// Buffer key: a chat as seen by one bot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct ChatKey {
    pub bot: String,
    pub chat_id: String,
}

impl ChatKey {
    pub(crate) fn new(bot: impl Into<String>, chat_id: impl Into<String>) -> Self {
        Self {
            bot: bot.into(),
            chat_id: chat_id.into(),
        }
    }
}

impl fmt::Display for ChatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bot, self.chat_id)
    }
}

/// A merged logical turn: the first event carries the metadata, `text` the
/// space-joined bodies in arrival order.
#[derive(Debug, Clone)]
pub(crate) struct Turn {
    pub key: ChatKey,
    pub first: InboundEvent,
    pub text: String,
    pub parts: usize,
}

struct Entry {
    pending: Vec<InboundEvent>,
    generation: u64,
    timer: JoinHandle<()>,
}

type Entries = Arc<Mutex<HashMap<ChatKey, Entry>>>;

#[derive(Clone)]
#[allow(missing_debug_implementations)]
pub(crate) struct MessageBuffer {
    entries: Entries,
    turns: mpsc::UnboundedSender<Turn>,
}

impl MessageBuffer {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Turn>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                entries: Arc::new(Mutex::new(HashMap::new())),
                turns: tx,
            },
            rx,
        )
    }

    /// Append `event` to the chat's pending list and restart its timer.
    pub(crate) fn push(&self, key: ChatKey, event: InboundEvent, quiet: Duration) {
        let mut entries = self.entries.lock().expect("buffer mutex poisoned");

        let generation = entries.get(&key).map_or(0, |e| e.generation + 1);
        let timer = self.spawn_timer(key.clone(), generation, quiet);

        match entries.get_mut(&key) {
            Some(entry) => {
                entry.timer.abort();
                entry.timer = timer;
                entry.generation = generation;
                entry.pending.push(event);
                debug!(chat = %key, pending = entry.pending.len(), "debounce restarted");
            }
            None => {
                debug!(chat = %key, "debounce started");
                entries.insert(
                    key,
                    Entry {
                        pending: vec![event],
                        generation,
                        timer,
                    },
                );
            }
        }
    }

    /// Number of chats with a live timer.
    pub(crate) fn pending_chats(&self) -> usize {
        self.entries.lock().expect("buffer mutex poisoned").len()
    }

    fn spawn_timer(&self, key: ChatKey, generation: u64, quiet: Duration) -> JoinHandle<()> {
        let entries = Arc::clone(&self.entries);
        let turns = self.turns.clone();
        let span = info_span!("debounce", chat = %key, generation);
        tokio::spawn(
            async move {
                tokio::time::sleep(quiet).await;
                if let Some(turn) = take_turn(&entries, &key, generation) {
                    debug!(parts = turn.parts, "debounce fired");
                    // Receiver gone means shutdown.
                    let _ = turns.send(turn);
                }
            }
            .instrument(span),
        )
    }
}

/// Remove the entry if `generation` is still the live one. An aborted timer
/// that already woke up loses here instead of firing twice.
fn take_turn(entries: &Entries, key: &ChatKey, generation: u64) -> Option<Turn> {
    let entry = {
        let mut entries = entries.lock().expect("buffer mutex poisoned");
        if entries.get(key)?.generation != generation {
            return None;
        }
        entries.remove(key)?
    };
    merge(key.clone(), entry.pending)
}

/// Deliveries can race each other into the buffer, so order by the
/// provider timestamp before joining.
fn merge(key: ChatKey, mut pending: Vec<InboundEvent>) -> Option<Turn> {
    pending.sort_by_key(|e| e.timestamp);
    let parts = pending.len();
    let text = pending
        .iter()
        .map(|e| e.body.trim())
        .filter(|body| !body.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    let first = pending.into_iter().next()?;
    Some(Turn {
        key,
        first,
        text,
        parts,
    })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::inbound;

    const QUIET: Duration = Duration::from_secs(30);

    fn key(chat: &str) -> ChatKey {
        ChatKey::new("sales", chat)
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_window_merges_into_one_turn() {
        let (buffer, mut turns) = MessageBuffer::new();

        buffer.push(key("601@c.us"), inbound("m1", "601@c.us", "A"), QUIET);
        tokio::time::sleep(Duration::from_secs(5)).await;
        buffer.push(key("601@c.us"), inbound("m2", "601@c.us", "B"), QUIET);

        let turn = turns.recv().await.unwrap();
        assert_eq!(turn.text, "A B");
        assert_eq!(turn.first.id, "m1");
        assert_eq!(turn.parts, 2);

        tokio::time::sleep(QUIET * 2).await;
        assert!(turns.try_recv().is_err());
        assert_eq!(buffer.pending_chats(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn messages_past_window_produce_two_turns() {
        let (buffer, mut turns) = MessageBuffer::new();

        buffer.push(key("601@c.us"), inbound("m1", "601@c.us", "A"), QUIET);
        tokio::time::sleep(Duration::from_secs(40)).await;
        buffer.push(key("601@c.us"), inbound("m2", "601@c.us", "B"), QUIET);

        let first = turns.recv().await.unwrap();
        let second = turns.recv().await.unwrap();
        assert_eq!(first.text, "A");
        assert_eq!(second.text, "B");
    }

    #[tokio::test(start_paused = true)]
    async fn window_slides_with_each_message() {
        let (buffer, mut turns) = MessageBuffer::new();

        for (i, body) in ["one", "two", "three"].iter().enumerate() {
            buffer.push(key("601@c.us"), inbound(&format!("m{i}"), "601@c.us", body), QUIET);
            tokio::time::sleep(Duration::from_secs(20)).await;
        }
        // 60s after the first message, but only 20s after the last.
        assert!(turns.try_recv().is_err());

        let turn = turns.recv().await.unwrap();
        assert_eq!(turn.text, "one two three");
    }

    #[tokio::test(start_paused = true)]
    async fn chats_are_buffered_independently() {
        let (buffer, mut turns) = MessageBuffer::new();

        buffer.push(key("601@c.us"), inbound("a", "601@c.us", "hi"), QUIET);
        buffer.push(key("602@c.us"), inbound("b", "602@c.us", "yo"), QUIET);
        assert_eq!(buffer.pending_chats(), 2);

        let mut texts = vec![
            turns.recv().await.unwrap().text,
            turns.recv().await.unwrap().text,
        ];
        texts.sort();
        assert_eq!(texts, vec!["hi", "yo"]);
    }

    #[test]
    fn merge_skips_empty_bodies() {
        let turn = merge(
            key("601@c.us"),
            vec![
                inbound("m1", "601@c.us", " hello "),
                inbound("m2", "601@c.us", ""),
                inbound("m3", "601@c.us", "there"),
            ],
        )
        .unwrap();
        assert_eq!(turn.text, "hello there");
        assert_eq!(turn.parts, 3);
    }

    #[test]
    fn merge_orders_by_provider_timestamp() {
        let mut early = inbound("m1", "601@c.us", "I want");
        let mut late = inbound("m2", "601@c.us", "a sofa");
        late.timestamp = early.timestamp + chrono::Duration::seconds(2);
        early.timestamp -= chrono::Duration::seconds(1);

        let turn = merge(key("601@c.us"), vec![late, early]).unwrap();
        assert_eq!(turn.text, "I want a sofa");
        assert_eq!(turn.first.id, "m1");
    }
}
