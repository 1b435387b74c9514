//! Subscription handles and per-registration message streams.

use std::sync::Weak;

use serde_json::Value;
use tokio::sync::broadcast;
use tracing::warn;

use super::{ConnectionManager, Shared, Topic};

/// Identity of a topic registration plus the capability to release it.
///
/// Two handles are equal when they name the same registration.
#[derive(Clone)]
pub struct SubscriptionHandle {
    id: String,
    topic: Topic,
    manager: Weak<Shared>,
}

impl SubscriptionHandle {
    pub(super) fn new(id: String, topic: Topic, manager: Weak<Shared>) -> Self {
        Self { id, topic, manager }
    }

    /// STOMP subscription id, shared by every handle for the same registration.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Release the registration. Returns `false` for a stale handle or a
    /// dropped manager.
    pub fn unsubscribe(&self) -> bool {
        match self.manager.upgrade() {
            Some(shared) => ConnectionManager { shared }.unsubscribe(self),
            None => false,
        }
    }
}

impl PartialEq for SubscriptionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.topic == other.topic
    }
}

impl Eq for SubscriptionHandle {}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .finish_non_exhaustive()
    }
}

/// Stream of decoded messages for one registration, in arrival order.
#[derive(Debug)]
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: broadcast::Receiver<Value>,
}

impl Subscription {
    pub(super) fn new(handle: SubscriptionHandle, rx: broadcast::Receiver<Value>) -> Self {
        Self { handle, rx }
    }

    #[must_use]
    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Next message. `None` once the topic is unsubscribed or the connection
    /// is torn down.
    ///
    /// A reader more than `channel_capacity` messages behind loses the oldest
    /// ones; the gap is logged and reading resumes at the oldest retained.
    pub async fn recv(&mut self) -> Option<Value> {
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.handle.topic, skipped, "subscriber lagged; messages dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Release the registration for every stream attached to it.
    pub fn unsubscribe(self) -> bool {
        self.handle.unsubscribe()
    }
}
