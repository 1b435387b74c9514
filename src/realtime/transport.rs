//! Realtime transport seam.
//!
//! A [`Connector`] opens a [`Transport`]: a bidirectional pipe of text
//! payloads, each holding zero or more STOMP frames. The connection task only
//! sees STOMP text; any outer envelope (SockJS) is handled here.
//!
//! `WebSocketConnector` is the production implementation over
//! `tokio-tungstenite`. With SockJS enabled it dials the raw-websocket SockJS
//! endpoint `{base}/{server}/{session}/websocket`, strips `o`/`h` frames,
//! unpacks `a[...]` batches and wraps outbound payloads in JSON arrays.

use std::collections::VecDeque;

use async_trait::async_trait;
use frames::sockjs::{SockJsFrame, decode_sockjs, encode_sockjs, websocket_path};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("invalid realtime URL: {0}")]
    InvalidUrl(String),
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
    #[error("server closed session: {code} {reason}")]
    Closed { code: u16, reason: String },
}

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

/// One open connection carrying STOMP text.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: &str) -> Result<(), TransportError>;

    /// Next inbound payload. `None` once the peer has closed.
    async fn next(&mut self) -> Option<Result<String, TransportError>>;

    /// Close our side cleanly.
    async fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Opens transports; called once per connection attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError>;
}

// =============================================================================
// WEBSOCKET
// =============================================================================

/// Dials the realtime endpoint with `tokio-tungstenite`.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    url: String,
    sockjs: bool,
}

impl WebSocketConnector {
    /// `url` is the HTTP(S) or WS(S) URL of the realtime endpoint, e.g.
    /// `http://localhost:8080/ws`.
    #[must_use]
    pub fn new(url: impl Into<String>, sockjs: bool) -> Self {
        Self { url: url.into(), sockjs }
    }

    /// URL dialed for the next attempt. SockJS gets a fresh session per call.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidUrl`] for schemes other than
    /// `http`, `https`, `ws` and `wss`.
    pub fn dial_url(&self) -> Result<String, TransportError> {
        let base = ws_url(&self.url)?;
        if !self.sockjs {
            return Ok(base);
        }
        let server_id = format!("{:03}", rand::random_range(0..1000_u32));
        let session_id = uuid::Uuid::new_v4().simple().to_string();
        Ok(format!("{}{}", base.trim_end_matches('/'), websocket_path(&server_id, &session_id[..8])))
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn open(&self) -> Result<Box<dyn Transport>, TransportError> {
        let url = self.dial_url()?;
        debug!(%url, "opening realtime websocket");
        let (stream, _) = connect_async(url.as_str()).await?;
        Ok(Box::new(WebSocketTransport { stream, sockjs: self.sockjs, pending: VecDeque::new() }))
    }
}

struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    sockjs: bool,
    pending: VecDeque<String>,
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: &str) -> Result<(), TransportError> {
        let payload = if self.sockjs { encode_sockjs(&[text]) } else { text.to_owned() };
        self.stream.send(Message::text(payload)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream.close(None).await?;
        Ok(())
    }

    async fn next(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            if let Some(payload) = self.pending.pop_front() {
                return Some(Ok(payload));
            }

            let text = match self.stream.next().await? {
                Ok(Message::Text(text)) => text.as_str().to_owned(),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => text,
                    Err(_) => {
                        warn!(len = bytes.len(), "dropping non-UTF-8 binary message");
                        continue;
                    }
                },
                Ok(Message::Close(_)) => return None,
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            };

            if !self.sockjs {
                return Some(Ok(text));
            }
            match decode_sockjs(&text) {
                Ok(SockJsFrame::Open | SockJsFrame::Heartbeat) => {}
                Ok(SockJsFrame::Messages(messages)) => self.pending.extend(messages),
                Ok(SockJsFrame::Close { code, reason }) => {
                    return Some(Err(TransportError::Closed { code, reason }));
                }
                Err(e) => warn!(error = %e, "dropping malformed SockJS frame"),
            }
        }
    }
}

/// Map an HTTP(S) URL to its websocket equivalent; `ws(s)` URLs pass through.
///
/// # Errors
///
/// Returns [`TransportError::InvalidUrl`] for any other scheme.
pub fn ws_url(url: &str) -> Result<String, TransportError> {
    if let Some(rest) = url.strip_prefix("http://") {
        return Ok(format!("ws://{rest}"));
    }
    if let Some(rest) = url.strip_prefix("https://") {
        return Ok(format!("wss://{rest}"));
    }
    if url.starts_with("ws://") || url.starts_with("wss://") {
        return Ok(url.to_owned());
    }
    Err(TransportError::InvalidUrl(url.to_owned()))
}

#[cfg(test)]
#[path = "transport_test.rs"]
mod tests;
