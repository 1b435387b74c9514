//! Top-level client wiring.
//!
//! DESIGN
//! ======
//! `AgoraClient` owns one `SessionStore` and hands clones of it to the
//! request client, so the realtime connection and every HTTP call see the
//! same credential. When credential refresh gives up, the realtime
//! connection is torn down since the broker would reject it anyway.

use std::sync::Arc;

use tracing::warn;

use crate::api::Api;
use crate::config::ClientConfig;
use crate::error::ErrorCode;
use crate::realtime::{ConnectionManager, Connector, WebSocketConnector};
use crate::request::{HttpTransport, RequestClient, RequestError};
use crate::session::{SessionError, SessionStore};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error("not logged in")]
    NotAuthenticated,
}

impl ErrorCode for ClientError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Session(e) => e.error_code(),
            Self::Request(e) => e.error_code(),
            Self::NotAuthenticated => "E_NOT_AUTHENTICATED",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Request(e) => e.retryable(),
            _ => false,
        }
    }
}

/// Session, HTTP API and realtime connection built from one config.
#[derive(Debug, Clone)]
pub struct AgoraClient {
    config: ClientConfig,
    session: SessionStore,
    api: Api,
    realtime: ConnectionManager,
}

impl AgoraClient {
    /// Build with the production `reqwest` and websocket transports.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Session`] when the session file cannot be read
    /// and [`ClientError::Request`] when the HTTP client cannot be built.
    pub fn from_config(config: ClientConfig) -> Result<Self, ClientError> {
        let session = match &config.session_file {
            Some(path) => SessionStore::open(path)?,
            None => SessionStore::in_memory(),
        };
        let http = RequestClient::new(&config.api_base, config.request, session.clone())?;
        let connector = Arc::new(WebSocketConnector::new(config.realtime_url(), config.sockjs));
        let realtime = ConnectionManager::new(connector, config.realtime.clone());
        Ok(Self::assemble(config, session, http, realtime))
    }

    /// Build over caller-supplied transports.
    #[must_use]
    pub fn with_transports(
        config: ClientConfig,
        session: SessionStore,
        http: Arc<dyn HttpTransport>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let client = RequestClient::with_transport(&config.api_base, config.request, session.clone(), http);
        let realtime = ConnectionManager::new(connector, config.realtime.clone());
        Self::assemble(config, session, client, realtime)
    }

    fn assemble(config: ClientConfig, session: SessionStore, http: RequestClient, realtime: ConnectionManager) -> Self {
        let on_failure = realtime.clone();
        http.set_on_auth_failed(move || {
            warn!("credential refresh failed; closing realtime connection");
            on_failure.disconnect();
        });
        Self { config, session, api: Api::new(http), realtime }
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    #[must_use]
    pub fn api(&self) -> &Api {
        &self.api
    }

    #[must_use]
    pub fn realtime(&self) -> &ConnectionManager {
        &self.realtime
    }

    /// Connect the realtime channel with the stored token.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotAuthenticated`] when the session holds no token.
    pub fn connect_realtime<F>(&self, on_ready: F) -> Result<(), ClientError>
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.session.token().ok_or(ClientError::NotAuthenticated)?;
        self.realtime.connect(&token, on_ready);
        Ok(())
    }

    /// Drop the realtime connection and forget the session.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Session`] when the session file cannot be removed.
    pub fn logout(&self) -> Result<(), ClientError> {
        self.realtime.disconnect();
        self.session.clear()?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "client_test.rs"]
mod tests;
