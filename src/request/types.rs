//! Request/response types and the normalized request error.

use std::time::Duration;

use serde_json::Value;

use crate::error::ErrorCode;

pub use reqwest::Method;

// =============================================================================
// ERROR
// =============================================================================

/// Failure class of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Transport-level failure before a response arrived.
    Network,
    /// The per-attempt deadline elapsed.
    Timeout,
    /// 401 that survived the one-shot refresh, or a failed refresh.
    Authorization,
    /// Any other non-2xx response.
    Server { status: u16 },
    /// The response body did not have the declared shape.
    Decode,
    /// The request could not be built (bad header, bad mime type).
    InvalidRequest,
}

/// Every request failure, normalized.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct RequestError {
    pub kind: ErrorKind,
    /// Server-provided message when available, otherwise a generated one.
    pub message: String,
    /// Raw server payload (JSON or text) for non-2xx responses.
    pub raw: Option<Value>,
}

impl RequestError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), raw: None }
    }

    /// HTTP status behind the error, if one was received.
    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            ErrorKind::Authorization => Some(401),
            ErrorKind::Server { status } => Some(status),
            _ => None,
        }
    }

    /// Build the terminal error for a non-2xx response.
    ///
    /// The message is the payload's `message` field when the body is JSON
    /// carrying one, else `Request failed: <status>`.
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Self {
        let raw = response_payload(response);
        let message = raw
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map_or_else(|| format!("Request failed: {}", response.status), ToOwned::to_owned);
        let kind = if response.status == 401 {
            ErrorKind::Authorization
        } else {
            ErrorKind::Server { status: response.status }
        };
        Self { kind, message, raw }
    }
}

impl ErrorCode for RequestError {
    fn error_code(&self) -> &'static str {
        match self.kind {
            ErrorKind::Network => "E_NETWORK",
            ErrorKind::Timeout => "E_TIMEOUT",
            ErrorKind::Authorization => "E_UNAUTHORIZED",
            ErrorKind::Server { .. } => "E_SERVER",
            ErrorKind::Decode => "E_DECODE",
            ErrorKind::InvalidRequest => "E_INVALID_REQUEST",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::Network | ErrorKind::Timeout)
    }
}

fn response_payload(response: &HttpResponse) -> Option<Value> {
    if response.body.is_empty() {
        return None;
    }
    if response.is_json() {
        if let Ok(value) = serde_json::from_slice::<Value>(&response.body) {
            return Some(value);
        }
    }
    Some(Value::String(String::from_utf8_lossy(&response.body).into_owned()))
}

/// Error produced by an [`HttpTransport`](super::transport::HttpTransport) attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("request timed out")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl From<SendError> for RequestError {
    fn from(err: SendError) -> Self {
        let kind = match &err {
            SendError::Timeout => ErrorKind::Timeout,
            SendError::Network(_) => ErrorKind::Network,
            SendError::InvalidRequest(_) => ErrorKind::InvalidRequest,
        };
        Self::new(kind, err.to_string())
    }
}

// =============================================================================
// REQUEST
// =============================================================================

/// One multipart field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Text { name: String, value: String },
    File { name: String, filename: String, bytes: Vec<u8>, mime: Option<String> },
}

impl Part {
    #[must_use]
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Text { name: name.into(), value: value.into() }
    }

    #[must_use]
    pub fn file(name: impl Into<String>, filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::File { name: name.into(), filename: filename.into(), bytes, mime: None }
    }

    #[must_use]
    pub fn with_mime(self, mime: impl Into<String>) -> Self {
        match self {
            Self::File { name, filename, bytes, .. } => Self::File { name, filename, bytes, mime: Some(mime.into()) },
            text @ Self::Text { .. } => text,
        }
    }
}

/// Request body. Multipart parts are kept owned so each retry can rebuild the form.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Body {
    #[default]
    Empty,
    Json(Value),
    Text(String),
    Multipart(Vec<Part>),
}

/// Response shape the caller expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Expect {
    /// JSON when the server says so, text otherwise.
    #[default]
    Json,
    /// Status, headers and bytes untouched.
    Raw,
}

/// Per-call options. `None` fields fall back to the client's [`RequestConfig`](crate::config::RequestConfig).
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Body,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub expect: Expect,
    /// Attach the bearer token and run the refresh flow on 401.
    pub authenticated: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            body: Body::Empty,
            timeout: None,
            max_retries: None,
            expect: Expect::Json,
            authenticated: true,
        }
    }
}

impl RequestOptions {
    #[must_use]
    pub fn get() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn post() -> Self {
        Self { method: Method::POST, ..Self::default() }
    }

    #[must_use]
    pub fn put() -> Self {
        Self { method: Method::PUT, ..Self::default() }
    }

    #[must_use]
    pub fn delete() -> Self {
        Self { method: Method::DELETE, ..Self::default() }
    }

    #[must_use]
    pub fn json(mut self, value: Value) -> Self {
        self.body = Body::Json(value);
        self
    }

    #[must_use]
    pub fn body(mut self, body: Body) -> Self {
        self.body = body;
        self
    }

    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    #[must_use]
    pub fn expect(mut self, expect: Expect) -> Self {
        self.expect = expect;
        self
    }

    /// Skip the bearer header and the refresh flow (login, register, public reads).
    #[must_use]
    pub fn anonymous(mut self) -> Self {
        self.authenticated = false;
        self
    }
}

/// A fully resolved single attempt, handed to the transport.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Body,
}

impl HttpRequest {
    /// First value of header `name`, case-insensitive.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

// =============================================================================
// RESPONSE
// =============================================================================

/// A received response with its body fully read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    /// Header names are lowercase.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn is_json(&self) -> bool {
        self.header("content-type")
            .is_some_and(|ct| ct.to_ascii_lowercase().contains("application/json"))
    }
}

/// Decoded response body.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
    Raw(HttpResponse),
}

impl ResponseBody {
    /// JSON value, parsing text bodies as a fallback.
    ///
    /// # Errors
    ///
    /// Returns a [`ErrorKind::Decode`] error when the body is not JSON.
    pub fn into_json(self) -> Result<Value, RequestError> {
        match self {
            Self::Json(value) => Ok(value),
            Self::Text(text) => serde_json::from_str(&text)
                .map_err(|e| RequestError::new(ErrorKind::Decode, format!("response is not JSON: {e}"))),
            Self::Raw(response) => serde_json::from_slice(&response.body)
                .map_err(|e| RequestError::new(ErrorKind::Decode, format!("response is not JSON: {e}"))),
        }
    }

    /// Text body; JSON values are re-serialized.
    #[must_use]
    pub fn into_text(self) -> String {
        match self {
            Self::Json(value) => value.to_string(),
            Self::Text(text) => text,
            Self::Raw(response) => String::from_utf8_lossy(&response.body).into_owned(),
        }
    }
}
