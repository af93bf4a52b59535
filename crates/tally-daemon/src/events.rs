//! Event emission.
//!
//! Events are pushed from the daemon to subscribers as JSON-RPC
//! notifications after the ledger mutation that caused them has committed.
//! Each subscriber has an independent buffer; a slow subscriber that falls
//! more than the channel capacity behind skips the events it missed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tally_types::events::{Event, EventType};
use tokio::sync::broadcast;

/// Filter for event subscriptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventFilter {
    /// Category filter: "ledger", "membership", "rewards", "system".
    #[serde(default)]
    pub categories: Option<Vec<String>>,
    /// Only events about these users. System events always pass.
    #[serde(default)]
    pub user_ids: Option<Vec<String>>,
}

/// Event bus for broadcasting events to subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    sequence: Arc<AtomicU64>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: Event) {
        self.sequence.fetch_add(1, Ordering::SeqCst);
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Emit every event in order.
    pub fn emit_all(&self, events: impl IntoIterator<Item = Event>) {
        for event in events {
            self.emit(event);
        }
    }

    /// Subscribe to events. Returns a receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Get the current sequence number.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl EventFilter {
    /// Check if an event matches this filter.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref categories) = self.categories {
            let category = event.event_type.category();
            if !categories.iter().any(|c| c == category) {
                return false;
            }
        }

        if let Some(ref user_ids) = self.user_ids {
            if let Some(uid) = event.payload.get("user_id").and_then(|v| v.as_str()) {
                if !user_ids.iter().any(|id| id == uid) {
                    return false;
                }
            }
        }

        true
    }
}

/// Build an event whose payload has no dedicated type.
pub fn event(event_type: EventType, timestamp: u64, payload: serde_json::Value) -> Event {
    Event {
        event_type,
        timestamp,
        payload,
    }
}
