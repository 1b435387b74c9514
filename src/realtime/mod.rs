//! Connection manager: one authenticated STOMP connection, many topics.
//!
//! DESIGN
//! ======
//! `ConnectionManager` is a cheap `Clone` over shared state. Mutable state
//! lives behind a `std::sync::Mutex` that is never held across an `.await`.
//! A single spawned task owns the transport; callers reach it through an
//! unbounded outbound queue that exists only while `Connected`.
//!
//! Each topic has one registration: a STOMP subscription id and a
//! `broadcast` channel. Every `subscribe` call gets its own receiver, so each
//! registration sees every message in arrival order.
//!
//! LIFECYCLE
//! =========
//! 1. `connect` → `Connecting`, spawn the connection task
//! 2. Handshake ok → `Connected`, re-send subscriptions, fire `on_ready`
//! 3. Transport lost → `Connecting`, wait `reconnect_delay`, go to 2
//! 4. `disconnect` → abort task, drop registrations, `Disconnected`
//!
//! `close` is the graceful form of 4: it queues `DISCONNECT` with a receipt
//! behind any pending frames, and the task closes the socket on the matching
//! `RECEIPT` before the teardown runs.
//!
//! Every connect bumps an epoch. A task only mutates state while its epoch
//! is current, so a torn-down task cannot clobber a newer connection.
//!
//! ERROR HANDLING
//! ==============
//! Only `publish` returns errors. Handshake, transport and decode failures
//! are logged inside the connection task and never close a healthy
//! connection.

mod connection;
pub mod subscription;
pub mod topic;
pub mod transport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use frames::{Command, Frame};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RealtimeConfig;
use crate::error::ErrorCode;
pub use subscription::{Subscription, SubscriptionHandle};
pub use topic::Topic;
pub use transport::{Connector, Transport, TransportError, WebSocketConnector};

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("realtime connection is not active")]
    NotConnected,
    #[error("handshake failed: {0}")]
    Handshake(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("frame codec error: {0}")]
    Codec(#[from] frames::CodecError),
    #[error("message body is not JSON: {0}")]
    Decode(serde_json::Error),
    #[error("payload encode failed: {0}")]
    Encode(serde_json::Error),
}

impl ErrorCode for RealtimeError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotConnected => "E_NOT_CONNECTED",
            Self::Handshake(_) => "E_HANDSHAKE",
            Self::Transport(_) => "E_TRANSPORT",
            Self::Codec(_) => "E_CODEC",
            Self::Decode(_) => "E_DECODE",
            Self::Encode(_) => "E_ENCODE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Handshake(_) | Self::Transport(_))
    }
}

type ReadyCallback = Box<dyn FnOnce() + Send>;

struct TopicEntry {
    id: String,
    sender: broadcast::Sender<Value>,
}

/// Outstanding `DISCONNECT` awaiting its `RECEIPT`.
struct Closing {
    receipt: String,
    done: oneshot::Sender<()>,
}

struct Inner {
    epoch: u64,
    credential: Option<String>,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    subscriptions: HashMap<Topic, TopicEntry>,
    pending_ready: Vec<ReadyCallback>,
    task: Option<JoinHandle<()>>,
    next_subscription: u64,
    closing: Option<Closing>,
}

pub(crate) struct Shared {
    connector: Arc<dyn Connector>,
    config: RealtimeConfig,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<ConnectionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(?previous, ?state, "realtime state changed");
        }
    }
}

// =============================================================================
// MANAGER
// =============================================================================

/// Handle to the realtime connection. Clones share one connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ConnectionManager {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, config: RealtimeConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let inner = Inner {
            epoch: 0,
            credential: None,
            outbound: None,
            subscriptions: HashMap::new(),
            pending_ready: Vec::new(),
            task: None,
            next_subscription: 0,
            closing: None,
        };
        Self { shared: Arc::new(Shared { connector, config, inner: Mutex::new(inner), state_tx }) }
    }

    /// Manager dialing `url` over websockets, optionally SockJS-framed.
    #[must_use]
    pub fn websocket(url: impl Into<String>, sockjs: bool, config: RealtimeConfig) -> Self {
        Self::new(Arc::new(WebSocketConnector::new(url, sockjs)), config)
    }

    #[must_use]
    pub fn config(&self) -> &RealtimeConfig {
        &self.shared.config
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Open the connection with `credential` as bearer token.
    ///
    /// `on_ready` runs once the connection is up: immediately when already
    /// connected, otherwise after the in-flight or new handshake completes.
    /// Must be called within a Tokio runtime.
    pub fn connect<F>(&self, credential: &str, on_ready: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut inner = self.shared.lock();
        match self.shared.state() {
            ConnectionState::Connected => {
                drop(inner);
                on_ready();
            }
            ConnectionState::Connecting => {
                debug!("connect while connecting; queueing on_ready");
                inner.pending_ready.push(Box::new(on_ready));
            }
            ConnectionState::Disconnected => {
                inner.epoch += 1;
                inner.credential = Some(credential.to_owned());
                inner.pending_ready.push(Box::new(on_ready));
                let epoch = inner.epoch;
                self.shared.set_state(ConnectionState::Connecting);
                inner.task = Some(tokio::spawn(connection::run(Arc::clone(&self.shared), epoch)));
                info!(epoch, "realtime connect started");
            }
        }
    }

    /// Register interest in `topic` and get a message stream.
    ///
    /// Returns `None` with a warning when not connected. A second call for
    /// the same topic reuses the registration and sends no `SUBSCRIBE`.
    pub fn subscribe(&self, topic: &Topic) -> Option<Subscription> {
        let mut inner = self.shared.lock();
        let Some(outbound) = inner.outbound.clone().filter(|_| self.shared.state() == ConnectionState::Connected)
        else {
            warn!(%topic, "subscribe without an active connection");
            return None;
        };

        if let Some(entry) = inner.subscriptions.get(topic) {
            let handle = SubscriptionHandle::new(entry.id.clone(), topic.clone(), Arc::downgrade(&self.shared));
            return Some(Subscription::new(handle, entry.sender.subscribe()));
        }

        inner.next_subscription += 1;
        let id = format!("sub-{}", inner.next_subscription);
        let (sender, rx) = broadcast::channel(self.shared.config.channel_capacity.max(1));
        if outbound.send(subscribe_frame(&id, topic)).is_err() {
            warn!(%topic, "connection task gone; subscribe dropped");
            return None;
        }
        inner.subscriptions.insert(topic.clone(), TopicEntry { id: id.clone(), sender });
        debug!(%topic, %id, "subscribed");

        let handle = SubscriptionHandle::new(id, topic.clone(), Arc::downgrade(&self.shared));
        Some(Subscription::new(handle, rx))
    }

    /// Callback form of [`ConnectionManager::subscribe`]; `handler` runs on a
    /// spawned task once per message.
    ///
    /// Delivery is bounded by `channel_capacity`: a handler that falls more
    /// than that many messages behind skips the oldest ones, and the skip is
    /// logged as a warning.
    pub fn subscribe_with<F>(&self, topic: &Topic, handler: F) -> Option<SubscriptionHandle>
    where
        F: Fn(Value) + Send + 'static,
    {
        let mut subscription = self.subscribe(topic)?;
        let handle = subscription.handle().clone();
        tokio::spawn(async move {
            while let Some(value) = subscription.recv().await {
                handler(value);
            }
        });
        Some(handle)
    }

    /// Remove the registration `handle` names and close its streams.
    ///
    /// Returns `false` when the handle is stale.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let mut inner = self.shared.lock();
        let live = inner
            .subscriptions
            .get(handle.topic())
            .is_some_and(|entry| entry.id == handle.id());
        if !live {
            debug!(topic = %handle.topic(), id = handle.id(), "stale unsubscribe ignored");
            return false;
        }

        inner.subscriptions.remove(handle.topic());
        if self.shared.state() == ConnectionState::Connected {
            if let Some(outbound) = &inner.outbound {
                let _ = outbound.send(Frame::new(Command::Unsubscribe).with_header("id", handle.id()));
            }
        }
        debug!(topic = %handle.topic(), id = handle.id(), "unsubscribed");
        true
    }

    /// Send `payload` as JSON to `topic`.
    ///
    /// # Errors
    ///
    /// Returns [`RealtimeError::NotConnected`] when no connection is active and
    /// [`RealtimeError::Encode`] when `payload` does not serialize.
    pub fn publish<T>(&self, topic: &Topic, payload: &T) -> Result<(), RealtimeError>
    where
        T: Serialize + ?Sized,
    {
        let outbound = {
            let inner = self.shared.lock();
            if self.shared.state() != ConnectionState::Connected {
                return Err(RealtimeError::NotConnected);
            }
            inner.outbound.clone().ok_or(RealtimeError::NotConnected)?
        };

        let body = serde_json::to_string(payload).map_err(RealtimeError::Encode)?;
        let frame = Frame::new(Command::Send)
            .with_header("destination", topic.as_str())
            .with_header("content-type", "application/json")
            .with_body(body);
        outbound.send(frame).map_err(|_| RealtimeError::NotConnected)
    }

    /// Publish a chat message to the configured send destination.
    ///
    /// # Errors
    ///
    /// Same as [`ConnectionManager::publish`].
    pub fn send_message(&self, conversation_id: &str, content: &str) -> Result<(), RealtimeError> {
        let destination = Topic::new(self.shared.config.send_destination.clone());
        let payload = serde_json::json!({ "conversationId": conversation_id, "content": content });
        self.publish(&destination, &payload)
    }

    /// Inbound topic of `conversation_id` under the configured prefix.
    #[must_use]
    pub fn conversation_topic(&self, conversation_id: &str) -> Topic {
        Topic::conversation(&self.shared.config.topic_prefix, conversation_id)
    }

    /// Graceful teardown. Frames already queued are written first, then a
    /// `DISCONNECT` carrying a receipt. Waits up to `grace` for the broker's
    /// `RECEIPT`, then runs [`ConnectionManager::disconnect`].
    pub async fn close(&self, grace: Duration) {
        let acknowledged = {
            let mut inner = self.shared.lock();
            let outbound = inner.outbound.clone().filter(|_| self.shared.state() == ConnectionState::Connected);
            match outbound {
                Some(outbound) => {
                    let receipt = format!("disconnect-{}", inner.epoch);
                    let (done, rx) = oneshot::channel();
                    let frame = Frame::new(Command::Disconnect).with_header("receipt", receipt.clone());
                    if outbound.send(frame).is_ok() {
                        inner.closing = Some(Closing { receipt, done });
                        Some(rx)
                    } else {
                        None
                    }
                }
                None => None,
            }
        };

        if let Some(rx) = acknowledged {
            match tokio::time::timeout(grace, rx).await {
                Ok(Ok(())) => debug!("broker acknowledged DISCONNECT"),
                _ => warn!(?grace, "no RECEIPT for DISCONNECT; tearing down"),
            }
        }
        self.disconnect();
    }

    /// Tear down immediately. Registrations and queued `on_ready` callbacks
    /// are dropped.
    pub fn disconnect(&self) {
        let mut inner = self.shared.lock();
        inner.epoch += 1;
        if let Some(task) = inner.task.take() {
            task.abort();
        }
        inner.outbound = None;
        inner.credential = None;
        inner.subscriptions.clear();
        inner.pending_ready.clear();
        inner.closing = None;
        self.shared.set_state(ConnectionState::Disconnected);
        info!("realtime disconnected");
    }
}

fn subscribe_frame(id: &str, topic: &Topic) -> Frame {
    Frame::new(Command::Subscribe)
        .with_header("id", id)
        .with_header("destination", topic.as_str())
        .with_header("ack", "auto")
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
