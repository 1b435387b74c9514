//! Request client: HTTP calls with deadline, retry and credential refresh.
//!
//! DESIGN
//! ======
//! Each logical call loops over attempts. An attempt is bounded by a
//! per-attempt deadline; network errors and deadline expiry are retried with
//! exponential backoff up to `max_retries`. A 401 walks the
//! [`RefreshPhase`] machine: one refresh via `POST /api/auth/refresh`, then
//! one retry that does not count against the transient budget. Every other
//! non-2xx response is terminal.
//!
//! ERROR HANDLING
//! ==============
//! All failures surface as [`RequestError`]. When the refresh flow gives up,
//! the registered auth-failed callback runs before the error is returned so
//! the caller can drop back to a login prompt.

pub mod refresh;
pub mod transport;
pub mod types;

use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::RequestConfig;
use crate::session::SessionStore;
pub use refresh::{RefreshPhase, backoff_delay};
pub use transport::{HttpTransport, ReqwestTransport};
pub use types::{
    Body, ErrorKind, Expect, HttpRequest, HttpResponse, Method, Part, RequestError, RequestOptions, ResponseBody,
    SendError,
};

/// Path of the token refresh endpoint, relative to the base URL.
pub const REFRESH_PATH: &str = "/api/auth/refresh";

type AuthFailedHook = Arc<dyn Fn() + Send + Sync>;

/// Cloneable HTTP client sharing one transport, session and callback set.
#[derive(Clone)]
pub struct RequestClient {
    transport: Arc<dyn HttpTransport>,
    session: SessionStore,
    config: RequestConfig,
    base_url: Arc<RwLock<String>>,
    on_auth_failed: Arc<RwLock<Option<AuthFailedHook>>>,
}

impl std::fmt::Debug for RequestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestClient")
            .field("base_url", &self.base_url())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RequestClient {
    /// Client over the default `reqwest` transport.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorKind::InvalidRequest`] error if the HTTP client cannot be built.
    pub fn new(base_url: &str, config: RequestConfig, session: SessionStore) -> Result<Self, RequestError> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::with_transport(base_url, config, session, Arc::new(transport)))
    }

    #[must_use]
    pub fn with_transport(
        base_url: &str,
        config: RequestConfig,
        session: SessionStore,
        transport: Arc<dyn HttpTransport>,
    ) -> Self {
        Self {
            transport,
            session,
            config,
            base_url: Arc::new(RwLock::new(base_url.trim_end_matches('/').to_owned())),
            on_auth_failed: Arc::new(RwLock::new(None)),
        }
    }

    #[must_use]
    pub fn base_url(&self) -> String {
        self.base_url
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_base_url(&self, url: &str) {
        *self.base_url.write().unwrap_or_else(PoisonError::into_inner) = url.trim_end_matches('/').to_owned();
    }

    /// Register the callback run when credential refresh gives up.
    pub fn set_on_auth_failed<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_auth_failed.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    #[must_use]
    pub fn session(&self) -> &SessionStore {
        &self.session
    }

    #[must_use]
    pub fn config(&self) -> RequestConfig {
        self.config
    }

    /// Absolute URL for `path`; absolute `http(s)` paths pass through.
    #[must_use]
    pub fn resolve_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_owned();
        }
        let base = self.base_url();
        if path.starts_with('/') { format!("{base}{path}") } else { format!("{base}/{path}") }
    }

    /// Issue a call with timeout, retry and one-shot refresh.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError`] once the retry budget is spent, on a terminal
    /// non-2xx response, on authorization failure, or when the body does not
    /// match `options.expect`.
    pub async fn request(&self, path: &str, options: RequestOptions) -> Result<ResponseBody, RequestError> {
        let url = self.resolve_url(path);
        let deadline = options.timeout.unwrap_or(self.config.timeout);
        let max_retries = options.max_retries.unwrap_or(self.config.max_retries);

        let mut phase = RefreshPhase::Idle;
        let mut retries: u32 = 0;
        let mut attempt: u32 = 0;

        loop {
            attempt = attempt.saturating_add(1);
            let request = self.build_attempt(&options, &url);
            let outcome = match tokio::time::timeout(deadline, self.transport.send(request)).await {
                Ok(result) => result,
                Err(_) => Err(SendError::Timeout),
            };

            let response = match outcome {
                Ok(response) => response,
                Err(err) => {
                    let err = RequestError::from(err);
                    if matches!(err.kind, ErrorKind::Network | ErrorKind::Timeout) && retries < max_retries {
                        retries += 1;
                        let delay = backoff_delay(self.config.retry_base, retries);
                        warn!(
                            error = %err,
                            %url,
                            attempt,
                            retry = retries,
                            max_retries,
                            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                            "request failed; retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    warn!(error = %err, %url, attempt, "request failed");
                    return Err(err);
                }
            };

            if response.status == 401 && options.authenticated {
                phase = phase.on_unauthorized();
                if phase == RefreshPhase::Refreshing {
                    info!(%url, "request unauthorized; refreshing credential");
                    let refreshed = self.refresh_credential(deadline).await;
                    phase = phase.on_refresh(refreshed);
                }
                if phase == RefreshPhase::Retrying {
                    continue;
                }
                warn!(%url, attempt, "authorization failed");
                self.notify_auth_failed();
                let mut err = RequestError::from_response(&response);
                if err.raw.is_none() {
                    err.message = "Authentication required".to_owned();
                }
                return Err(err);
            }

            phase = phase.on_response();
            if !response.is_success() {
                let err = RequestError::from_response(&response);
                warn!(%url, status = response.status, error = %err, "request rejected");
                return Err(err);
            }

            debug!(%url, status = response.status, attempt, ?phase, "request completed");
            return decode_body(response, options.expect);
        }
    }

    /// [`RequestClient::request`] decoded into `T`.
    ///
    /// # Errors
    ///
    /// Same as [`RequestClient::request`], plus [`ErrorKind::Decode`] when the
    /// body does not deserialize into `T`.
    pub async fn request_json<T>(&self, path: &str, options: RequestOptions) -> Result<T, RequestError>
    where
        T: DeserializeOwned,
    {
        let value = self.request(path, options.expect(Expect::Json)).await?.into_json()?;
        serde_json::from_value(value)
            .map_err(|e| RequestError::new(ErrorKind::Decode, format!("unexpected response shape: {e}")))
    }

    fn build_attempt(&self, options: &RequestOptions, url: &str) -> HttpRequest {
        let mut headers = Vec::with_capacity(options.headers.len() + 1);
        if options.authenticated {
            if let Some(token) = self.session.token() {
                headers.push(("Authorization".to_owned(), format!("Bearer {token}")));
            }
        }
        headers.extend(options.headers.iter().cloned());
        HttpRequest { method: options.method.clone(), url: url.to_owned(), headers, body: options.body.clone() }
    }

    /// One refresh call. Never retried; any failure means `false`.
    async fn refresh_credential(&self, deadline: std::time::Duration) -> bool {
        let Some(refresh_token) = self.session.refresh_token() else {
            debug!("no refresh token stored");
            return false;
        };

        let request = HttpRequest {
            method: Method::POST,
            url: self.resolve_url(REFRESH_PATH),
            headers: Vec::new(),
            body: Body::Json(serde_json::json!({ "refreshToken": refresh_token })),
        };
        let response = match tokio::time::timeout(deadline, self.transport.send(request)).await {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                warn!(error = %err, "credential refresh failed");
                return false;
            }
            Err(_) => {
                warn!("credential refresh timed out");
                return false;
            }
        };
        if !response.is_success() {
            warn!(status = response.status, "credential refresh rejected");
            return false;
        }

        let Ok(body) = serde_json::from_slice::<Value>(&response.body) else {
            warn!("credential refresh returned non-JSON body");
            return false;
        };
        let Some(token) = body.get("token").and_then(Value::as_str).filter(|t| !t.is_empty()) else {
            warn!("credential refresh response has no token");
            return false;
        };
        let rotated = body
            .get("refreshToken")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned);

        if let Err(e) = self.session.set_tokens(token.to_owned(), rotated) {
            warn!(error = %e, "refreshed credential not persisted");
        }
        info!("credential refreshed");
        true
    }

    fn notify_auth_failed(&self) {
        let hook = self
            .on_auth_failed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

fn decode_body(response: HttpResponse, expect: Expect) -> Result<ResponseBody, RequestError> {
    match expect {
        Expect::Raw => Ok(ResponseBody::Raw(response)),
        Expect::Json if response.is_json() => {
            if response.body.iter().all(u8::is_ascii_whitespace) {
                return Ok(ResponseBody::Json(Value::Null));
            }
            serde_json::from_slice(&response.body)
                .map(ResponseBody::Json)
                .map_err(|e| RequestError::new(ErrorKind::Decode, format!("invalid JSON response: {e}")))
        }
        Expect::Json => Ok(ResponseBody::Text(String::from_utf8_lossy(&response.body).into_owned())),
    }
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
