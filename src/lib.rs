//! Agora client library.
//!
//! ARCHITECTURE
//! ============
//! - [`request`]: HTTP calls with per-attempt timeout, exponential backoff
//!   and one-shot credential refresh on 401.
//! - [`realtime`]: one STOMP connection (SockJS over websocket) multiplexing
//!   per-conversation topic subscriptions, with fixed-delay reconnect.
//! - [`session`]: the bearer credential and display fields, optionally
//!   persisted to a JSON file.
//! - [`api`]: typed helpers for the backend's REST endpoints.
//! - [`jwt`]: unverified claim decoding for display purposes.
//! - [`config`]: environment-driven configuration.
//!
//! [`AgoraClient`] wires these together from one [`ClientConfig`].

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod jwt;
pub mod realtime;
pub mod request;
pub mod session;

pub use client::{AgoraClient, ClientError};
pub use config::ClientConfig;
pub use error::ErrorCode;
pub use realtime::{ConnectionManager, ConnectionState, RealtimeError, Subscription, SubscriptionHandle, Topic};
pub use request::{ErrorKind, RequestClient, RequestError, RequestOptions};
pub use session::{Session, SessionStore};
