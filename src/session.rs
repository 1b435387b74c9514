//! Session credential store.
//!
//! DESIGN
//! ======
//! The bearer token, refresh token and a few display fields live in one
//! `SessionStore` handle that is cloned into the request client and the
//! realtime manager. When opened with a path the session is mirrored to a
//! JSON file on every write, so it survives restarts; `clear` (logout)
//! removes the file.

use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("session file I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Io(_) => "E_SESSION_IO",
            Self::Json(_) => "E_SESSION_JSON",
        }
    }
}

/// Persisted client session. Every field is absent after logout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

impl Session {
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

/// Shared, optionally file-backed session handle.
#[derive(Debug, Clone)]
pub struct SessionStore {
    inner: Arc<RwLock<Session>>,
    path: Option<PathBuf>,
}

impl SessionStore {
    /// A store that never touches the filesystem.
    #[must_use]
    pub fn in_memory() -> Self {
        Self { inner: Arc::new(RwLock::new(Session::default())), path: None }
    }

    /// Open a file-backed store. A missing file yields an empty session.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let session = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str::<Session>(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Session::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), authenticated = session.is_authenticated(), "session loaded");
        Ok(Self { inner: Arc::new(RwLock::new(session)), path: Some(path) })
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    #[must_use]
    pub fn snapshot(&self) -> Session {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[must_use]
    pub fn token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .token
            .clone()
            .filter(|t| !t.is_empty())
    }

    #[must_use]
    pub fn refresh_token(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
    }

    /// Replace the whole session (login) and persist it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the session file cannot be written. The
    /// in-memory session is updated regardless.
    pub fn login(&self, session: Session) -> Result<(), SessionError> {
        self.update(|current| *current = session)
    }

    /// Store a refreshed token pair. A `None` refresh token keeps the old one.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the session file cannot be written.
    pub fn set_tokens(&self, token: String, refresh_token: Option<String>) -> Result<(), SessionError> {
        self.update(|current| {
            current.token = Some(token);
            if refresh_token.is_some() {
                current.refresh_token = refresh_token;
            }
        })
    }

    /// Update display fields after a profile change.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the session file cannot be written.
    pub fn set_profile(&self, username: Option<String>, avatar_url: Option<String>) -> Result<(), SessionError> {
        self.update(|current| {
            if username.is_some() {
                current.username = username;
            }
            if avatar_url.is_some() {
                current.avatar_url = avatar_url;
            }
        })
    }

    /// Logout: drop every field and delete the session file.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if an existing session file cannot be removed.
    pub fn clear(&self) -> Result<(), SessionError> {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Session::default();
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!("session cleared");
        Ok(())
    }

    fn update(&self, apply: impl FnOnce(&mut Session)) -> Result<(), SessionError> {
        let snapshot = {
            let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
            apply(&mut guard);
            guard.clone()
        };
        self.persist(&snapshot)
    }

    fn persist(&self, session: &Session) -> Result<(), SessionError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(session)?;
        std::fs::write(path, raw).inspect_err(|e| {
            warn!(error = %e, path = %path.display(), "session persist failed");
        })?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "session_test.rs"]
mod tests;
