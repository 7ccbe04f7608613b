//! Per-conversation message log.
//!
//! The merged, ordered, deduplicated store of messages. Two writers exist:
//! the pagination controller (historical pages) and the stream pipeline
//! (closed streaming messages). They touch disjoint message ids by
//! construction — a streaming message's id is reserved before its first
//! event is processed — and each conversation's entry is additionally
//! guarded by its map shard, so a page merge is atomic.
//!
//! The backend is authoritative; the log has no persistence obligation and
//! is dropped with the client.

use dashmap::DashMap;

use tidepool_protocol::{Message, Page};

#[derive(Debug, Default)]
struct ConversationLog {
    /// Ordered oldest-first by `created_at_seq`.
    messages: Vec<Message>,
}

/// In-memory message store keyed by conversation id.
#[derive(Debug, Default)]
pub struct MessageLog {
    conversations: DashMap<String, ConversationLog>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one historical page into a conversation.
    ///
    /// Ids already present are left untouched (duplicate delivery is
    /// absorbed, not an error). New ids keep the page's internal order and
    /// are placed before the oldest previously-known message, since
    /// pagination walks backward in time. Page-delivered records are
    /// durable by definition, so they are marked final.
    ///
    /// Returns the number of messages inserted. The whole merge happens
    /// under the conversation entry's lock with no await point, so a
    /// cancelled fetch task can never leave a page half-merged.
    pub fn merge_page(&self, conversation_id: &str, page: &Page) -> usize {
        let mut entry = self
            .conversations
            .entry(conversation_id.to_string())
            .or_default();

        let mut fresh: Vec<Message> = Vec::with_capacity(page.messages.len());
        for message in &page.messages {
            let seen = entry.messages.iter().any(|m| m.id == message.id)
                || fresh.iter().any(|m| m.id == message.id);
            if seen {
                tracing::debug!(
                    "Duplicate message {} in page for conversation {}, absorbed",
                    message.id,
                    conversation_id
                );
                continue;
            }
            let mut message = message.clone();
            message.is_final = true;
            fresh.push(message);
        }

        let inserted = fresh.len();
        entry.messages.splice(0..0, fresh);

        tracing::debug!(
            "Merged {} message(s) into conversation {} ({} total)",
            inserted,
            conversation_id,
            entry.messages.len()
        );

        inserted
    }

    /// Record a closed streaming message.
    ///
    /// Called when a stream closes: with the verified persisted payload on
    /// success, or with the partial message plus its error marker on
    /// failure — partial content is never silently discarded. A reserved id
    /// is unique, so this normally appends; if the id somehow already
    /// exists, a non-final entry is replaced and a final one is left
    /// untouched (final messages are immutable).
    pub fn append_streamed(&self, message: Message) {
        let mut entry = self
            .conversations
            .entry(message.conversation_id.clone())
            .or_default();

        if let Some(existing) = entry.messages.iter_mut().find(|m| m.id == message.id) {
            if existing.is_final {
                tracing::warn!(
                    "Ignoring streamed update for final message {} in conversation {}",
                    message.id,
                    message.conversation_id
                );
                return;
            }
            *existing = message;
        } else {
            entry.messages.push(message);
        }
    }

    /// Next ordering key for a new streaming message in a conversation:
    /// greater than everything currently known.
    pub fn next_seq(&self, conversation_id: &str) -> u64 {
        self.conversations
            .get(conversation_id)
            .and_then(|entry| entry.messages.iter().map(|m| m.created_at_seq).max())
            .map_or(1, |max| max + 1)
    }

    /// Snapshot of a conversation's messages, oldest first.
    pub fn messages(&self, conversation_id: &str) -> Vec<Message> {
        self.conversations
            .get(conversation_id)
            .map(|entry| entry.messages.clone())
            .unwrap_or_default()
    }

    pub fn len(&self, conversation_id: &str) -> usize {
        self.conversations
            .get(conversation_id)
            .map(|entry| entry.messages.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, conversation_id: &str) -> bool {
        self.len(conversation_id) == 0
    }

    pub fn contains(&self, conversation_id: &str, message_id: &str) -> bool {
        self.conversations
            .get(conversation_id)
            .map(|entry| entry.messages.iter().any(|m| m.id == message_id))
            .unwrap_or(false)
    }

    /// Discard a conversation's content (used when switching conversations).
    pub fn reset(&self, conversation_id: &str) {
        self.conversations.remove(conversation_id);
    }
}
