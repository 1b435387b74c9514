//! SockJS envelope framing for the websocket transport.
//!
//! A SockJS server wraps every payload in a one-letter frame type:
//! `o` (open), `h` (heartbeat), `a[...]` (a JSON array of messages),
//! `c[code,"reason"]` (close). Clients send a bare JSON array of strings.

use crate::CodecError;

/// One decoded SockJS server frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SockJsFrame {
    Open,
    Heartbeat,
    Messages(Vec<String>),
    Close { code: u16, reason: String },
}

/// Decode a server-sent SockJS frame.
///
/// # Errors
///
/// Returns [`CodecError::SockJs`] for unknown frame types or malformed JSON.
pub fn decode_sockjs(input: &str) -> Result<SockJsFrame, CodecError> {
    let mut chars = input.chars();
    let Some(kind) = chars.next() else {
        return Err(CodecError::SockJs("empty frame".to_owned()));
    };
    let payload = chars.as_str();

    match kind {
        'o' => Ok(SockJsFrame::Open),
        'h' => Ok(SockJsFrame::Heartbeat),
        'a' => serde_json::from_str::<Vec<String>>(payload)
            .map(SockJsFrame::Messages)
            .map_err(|e| CodecError::SockJs(e.to_string())),
        'm' => serde_json::from_str::<String>(payload)
            .map(|message| SockJsFrame::Messages(vec![message]))
            .map_err(|e| CodecError::SockJs(e.to_string())),
        'c' => serde_json::from_str::<(u16, String)>(payload)
            .map(|(code, reason)| SockJsFrame::Close { code, reason })
            .map_err(|e| CodecError::SockJs(e.to_string())),
        other => Err(CodecError::SockJs(format!("unknown frame type '{other}'"))),
    }
}

/// Encode outbound messages as the JSON array SockJS expects.
#[must_use]
pub fn encode_sockjs(messages: &[&str]) -> String {
    // Serializing a slice of strings cannot fail.
    serde_json::to_string(messages).unwrap_or_default()
}

/// Path suffix of the raw-websocket SockJS endpoint: `/{server}/{session}/websocket`.
#[must_use]
pub fn websocket_path(server_id: &str, session_id: &str) -> String {
    format!("/{server_id}/{session_id}/websocket")
}

#[cfg(test)]
#[path = "sockjs_test.rs"]
mod tests;
