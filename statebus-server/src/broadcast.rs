//! Transition broadcasting for watchers.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;

type Subscriptions = DashMap<String, EventFilter>;

/// A processed event, accepted or rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionEvent {
    pub definition_id: String,
    pub instance_id: String,
    pub event: String,
    pub from_state: String,
    pub to_state: String,
    pub accepted: bool,
    pub partition: u32,
    pub offset: u64,
}

/// Filter for watch subscriptions.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events for these definitions (empty = all).
    pub definitions: Vec<String>,
    /// Only events for these instances (empty = all).
    pub instances: Vec<String>,
    /// Only events FROM these states (empty = all).
    pub from_states: Vec<String>,
    /// Only events TO these states (empty = all).
    pub to_states: Vec<String>,
    /// Only these event names (empty = all).
    pub events: Vec<String>,
    /// Also deliver rejected events.
    pub include_rejected: bool,
}

impl EventFilter {
    /// Filter matching a single instance.
    pub fn instance(instance_id: impl Into<String>) -> Self {
        Self {
            instances: vec![instance_id.into()],
            ..Default::default()
        }
    }

    /// Returns true if the event matches this filter.
    pub fn matches(&self, event: &TransitionEvent) -> bool {
        (event.accepted || self.include_rejected)
            && (self.definitions.is_empty() || self.definitions.contains(&event.definition_id))
            && (self.instances.is_empty() || self.instances.contains(&event.instance_id))
            && (self.from_states.is_empty() || self.from_states.contains(&event.from_state))
            && (self.to_states.is_empty() || self.to_states.contains(&event.to_state))
            && (self.events.is_empty() || self.events.contains(&event.event))
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Watch {
    id: String,
    filter: EventFilter,
    receiver: broadcast::Receiver<TransitionEvent>,
    subscriptions: Weak<Subscriptions>,
}

impl Watch {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Waits for the next matching event.
    ///
    /// Returns `None` once the broadcaster is gone. Events missed because the
    /// watcher fell behind are skipped.
    pub async fn next(&mut self) -> Option<TransitionEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Watch {} lagged, skipped {} events", self.id, n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        if let Some(subscriptions) = self.subscriptions.upgrade() {
            subscriptions.remove(&self.id);
        }
    }
}

/// Fans processed events out to watchers.
pub struct TransitionBroadcaster {
    sender: broadcast::Sender<TransitionEvent>,

    /// Filters of active subscriptions by id.
    subscriptions: Arc<Subscriptions>,
}

impl TransitionBroadcaster {
    /// Creates a new broadcaster with the specified channel capacity.
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity);
        Self {
            sender,
            subscriptions: Arc::new(DashMap::new()),
        }
    }

    /// Subscribes to events matching `filter`.
    pub fn subscribe(&self, filter: EventFilter) -> Watch {
        let id = format!("sub-{}", uuid::Uuid::new_v4());
        self.subscriptions.insert(id.clone(), filter.clone());
        Watch {
            id,
            filter,
            receiver: self.sender.subscribe(),
            subscriptions: Arc::downgrade(&self.subscriptions),
        }
    }

    /// Subscribes to one instance's accepted transitions.
    pub fn subscribe_instance(&self, instance_id: &str) -> Watch {
        self.subscribe(EventFilter::instance(instance_id))
    }

    /// Unsubscribes from events.
    ///
    /// Returns true if the subscription was found and removed.
    pub fn unsubscribe(&self, subscription_id: &str) -> bool {
        self.subscriptions.remove(subscription_id).is_some()
    }

    /// Sends an event to every watcher.
    pub fn notify(&self, event: TransitionEvent) {
        // no receivers is fine
        let _ = self.sender.send(event);
    }

    /// Returns the number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

impl Default for TransitionBroadcaster {
    fn default() -> Self {
        Self::new(1024)
    }
}
