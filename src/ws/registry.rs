//! Subscription registry mapping event-type tags to ordered callback lists

use crate::ws::events::EventType;
use dashmap::DashMap;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error};

/// Callback invoked with the `data` field of a matching envelope (not the
/// full envelope). Keep a clone of the `Arc` to unsubscribe later.
pub type EventCallback = dyn Fn(Option<&Value>) + Send + Sync;

/// Tag -> ordered callback list. Callbacks for a tag fire in registration
/// order. Identity is `Arc` pointer identity.
#[derive(Default)]
pub struct SubscriptionRegistry {
    callbacks: DashMap<String, Vec<Arc<EventCallback>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a callback to the tag's list, creating the list if absent.
    /// Never fails; valid in any connection state.
    pub fn subscribe(&self, event_type: EventType, callback: Arc<EventCallback>) {
        self.callbacks
            .entry(event_type.as_str().to_string())
            .or_default()
            .push(callback);
    }

    /// Remove the first entry matching the callback by pointer identity.
    /// Removing a callback that was never registered is a no-op.
    pub fn unsubscribe(&self, event_type: EventType, callback: &Arc<EventCallback>) {
        if let Some(mut entry) = self.callbacks.get_mut(event_type.as_str()) {
            if let Some(pos) = entry.iter().position(|cb| Arc::ptr_eq(cb, callback)) {
                entry.remove(pos);
            }
        }
    }

    /// Invoke every callback registered for the tag, in registration order.
    /// A panicking callback is logged and must not prevent the remaining
    /// callbacks from running. Returns the number of callbacks invoked.
    pub fn dispatch(&self, tag: &str, data: Option<&Value>) -> usize {
        // Snapshot the list so callbacks may re-enter the registry
        let snapshot: Vec<Arc<EventCallback>> = match self.callbacks.get(tag) {
            Some(entry) => entry.clone(),
            None => {
                debug!(event_type = %tag, "No subscribers for event");
                return 0;
            }
        };

        let mut invoked = 0;
        for callback in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(data))).is_err() {
                error!(event_type = %tag, "Subscriber callback panicked");
            }
            invoked += 1;
        }
        invoked
    }

    /// Number of callbacks currently registered for a tag
    pub fn subscriber_count(&self, event_type: EventType) -> usize {
        self.callbacks
            .get(event_type.as_str())
            .map(|entry| entry.len())
            .unwrap_or(0)
    }
}
