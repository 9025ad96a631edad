//! Message router: decodes inbound frames and decides where they go.
//!
//! - `typing` frames go to the presence tracker only; they are never stored
//!   or shown as chat.
//! - `text`/`file` frames are always stored, and surfaced to the consumer
//!   only when they belong to the open conversation or are addressed to the
//!   broadcast identity.
//! - Malformed frames are logged and dropped.

use std::sync::Arc;

use crate::protocol::{self, ChatEvent, InboundEvent, TypingEvent};
use crate::store::{ChatRecord, MessageStore};

/// Where an inbound frame ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Routed {
    /// Forward to the presence tracker.
    Typing(TypingEvent),
    /// Stored chat message; `surface` says whether the consumer should see it now.
    Chat { record: ChatRecord, surface: bool },
    Dropped,
}

pub struct Router {
    identity: String,
    broadcast: String,
    active: Option<String>,
    store: Arc<dyn MessageStore>,
}

impl Router {
    pub fn new(identity: &str, broadcast: &str, store: Arc<dyn MessageStore>) -> Self {
        Self {
            identity: identity.to_string(),
            broadcast: broadcast.to_string(),
            active: None,
            store,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn set_identity(&mut self, identity: &str) {
        self.identity = identity.to_string();
    }

    pub fn active_conversation(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Make `peer` the open conversation and return its stored history.
    pub fn open_conversation(&mut self, peer: &str) -> Vec<ChatRecord> {
        self.active = Some(peer.to_string());
        let history = if peer == self.broadcast {
            self.store.broadcast_messages(&self.broadcast)
        } else {
            self.store.messages_with(peer, &self.identity)
        };
        history.unwrap_or_else(|e| {
            tracing::warn!(peer, error = %e, "Failed to load history");
            Vec::new()
        })
    }

    pub fn close_conversation(&mut self) {
        self.active = None;
    }

    /// Whether a chat event should be shown given the open conversation.
    pub fn is_visible(&self, event: &ChatEvent) -> bool {
        let Some(active) = self.active.as_deref() else {
            return false;
        };
        event.receiver == self.broadcast || event.sender == active || event.receiver == active
    }

    /// Decode and dispatch one inbound frame.
    pub fn route_inbound(&self, raw: &str) -> Routed {
        match protocol::decode(raw) {
            Ok(InboundEvent::Typing(typing)) => Routed::Typing(typing),
            Ok(InboundEvent::Chat(chat)) => {
                let surface = self.is_visible(&chat);
                let record = self.persist(&chat);
                Routed::Chat { record, surface }
            }
            Err(e) => {
                tracing::warn!(error = %e, frame = raw, "Dropping inbound frame");
                Routed::Dropped
            }
        }
    }

    /// Store an outbound chat message before it is transmitted.
    pub fn record_outbound(&self, event: &ChatEvent) -> ChatRecord {
        self.persist(event)
    }

    fn persist(&self, event: &ChatEvent) -> ChatRecord {
        let mut record = ChatRecord::from_event(event, &self.identity);
        match self.store.insert(&record) {
            Ok(id) => record.id = id,
            Err(e) => {
                tracing::warn!(sender = %event.sender, receiver = %event.receiver, error = %e, "Failed to store message")
            }
        }
        record
    }
}
