//! STOMP frame model and text codec for the realtime chat transport.
//!
//! This crate owns the wire representation used by the `agora` client and the
//! `cli`. Frames are STOMP 1.2 text frames: a command line, `name:value`
//! header lines, a blank line, the body, and a NUL terminator. The `sockjs`
//! module handles the outer SockJS envelope the frames travel in.

pub mod sockjs;

use std::fmt;
use std::str::FromStr;

/// Error returned by [`decode_frame`] and the [`sockjs`] helpers.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The command line does not name a known STOMP command.
    #[error("unknown STOMP command: {0}")]
    UnknownCommand(String),
    /// A header line is missing its `:` separator.
    #[error("malformed header line: {0}")]
    MalformedHeader(String),
    /// A header contains an escape sequence STOMP 1.2 does not define.
    #[error("invalid header escape sequence in: {0}")]
    InvalidEscape(String),
    /// The frame ended before its NUL terminator.
    #[error("frame is missing its NUL terminator")]
    MissingTerminator,
    /// The `content-length` header is unparseable or exceeds the frame.
    #[error("invalid content-length: {0}")]
    InvalidContentLength(String),
    /// The input held only heartbeats where a frame was required.
    #[error("no frame in input")]
    Empty,
    /// The SockJS envelope could not be parsed.
    #[error("malformed SockJS frame: {0}")]
    SockJs(String),
}

/// STOMP 1.2 frame commands, client and server side.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    /// Wire spelling of the command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// `CONNECT` and `CONNECTED` headers are never escaped (STOMP 1.2 §Value Encoding).
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Command {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let command = match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            other => return Err(CodecError::UnknownCommand(other.to_owned())),
        };
        Ok(command)
    }
}

/// A single STOMP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Headers in wire order. Repeated names are kept; the first one wins on lookup.
    pub headers: Vec<(String, String)>,
    /// UTF-8 body, usually JSON.
    pub body: String,
}

impl Frame {
    #[must_use]
    pub fn new(command: Command) -> Self {
        Self { command, headers: Vec::new(), body: String::new() }
    }

    /// Append a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`, if present.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Encode a frame into its wire text.
///
/// A `content-length` header is added for non-empty bodies that do not carry
/// one already.
#[must_use]
pub fn encode_frame(frame: &Frame) -> String {
    let escape = frame.command.escapes_headers();
    let mut out = String::with_capacity(frame.body.len() + 64);
    out.push_str(frame.command.as_str());
    out.push('\n');
    for (name, value) in &frame.headers {
        if escape {
            out.push_str(&escape_header(name));
            out.push(':');
            out.push_str(&escape_header(value));
        } else {
            out.push_str(name);
            out.push(':');
            out.push_str(value);
        }
        out.push('\n');
    }
    if !frame.body.is_empty() && frame.header("content-length").is_none() {
        out.push_str("content-length:");
        out.push_str(&frame.body.len().to_string());
        out.push('\n');
    }
    out.push('\n');
    out.push_str(&frame.body);
    out.push('\0');
    out
}

/// Decode exactly one frame, ignoring leading heartbeats and trailing EOLs.
///
/// # Errors
///
/// Returns [`CodecError::Empty`] for heartbeat-only input and the matching
/// [`CodecError`] variant for malformed frames.
pub fn decode_frame(input: &str) -> Result<Frame, CodecError> {
    match parse_next(input)? {
        Some((frame, _)) => Ok(frame),
        None => Err(CodecError::Empty),
    }
}

/// Decode every frame in `input`. Heartbeat-only input yields an empty vec.
///
/// # Errors
///
/// Returns the first [`CodecError`] encountered; frames before it are discarded.
pub fn decode_frames(input: &str) -> Result<Vec<Frame>, CodecError> {
    let mut frames = Vec::new();
    let mut rest = input;
    while let Some((frame, remaining)) = parse_next(rest)? {
        frames.push(frame);
        rest = remaining;
    }
    Ok(frames)
}

/// True when `input` carries nothing but heartbeat EOLs.
#[must_use]
pub fn is_heartbeat(input: &str) -> bool {
    input.bytes().all(|b| b == b'\n' || b == b'\r')
}

fn parse_next(input: &str) -> Result<Option<(Frame, &str)>, CodecError> {
    let input = input.trim_start_matches(['\r', '\n']);
    if input.is_empty() {
        return Ok(None);
    }

    let (command_line, mut rest) = split_line(input).ok_or(CodecError::MissingTerminator)?;
    let command = Command::from_str(command_line)?;
    let escape = command.escapes_headers();

    let mut headers = Vec::new();
    loop {
        let (line, remaining) = split_line(rest).ok_or(CodecError::MissingTerminator)?;
        rest = remaining;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CodecError::MalformedHeader(line.to_owned()))?;
        if escape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_owned(), value.to_owned()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(name, _)| name == "content-length")
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| CodecError::InvalidContentLength(value.clone()))
        })
        .transpose()?;

    let (body, after) = match content_length {
        Some(len) => {
            let body = rest
                .get(..len)
                .ok_or_else(|| CodecError::InvalidContentLength(len.to_string()))?;
            let after = rest[len..]
                .strip_prefix('\0')
                .ok_or(CodecError::MissingTerminator)?;
            (body, after)
        }
        None => {
            let end = rest.find('\0').ok_or(CodecError::MissingTerminator)?;
            (&rest[..end], &rest[end + 1..])
        }
    };

    let frame = Frame { command, headers, body: body.to_owned() };
    Ok(Some((frame, after)))
}

/// Split off one line, accepting `\n` or `\r\n`.
fn split_line(input: &str) -> Option<(&str, &str)> {
    let idx = input.find('\n')?;
    let line = input[..idx].strip_suffix('\r').unwrap_or(&input[..idx]);
    Some((line, &input[idx + 1..]))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape_header(raw: &str) -> Result<String, CodecError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            out.push(ch);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            _ => return Err(CodecError::InvalidEscape(raw.to_owned())),
        }
    }
    Ok(out)
}

#[cfg(test)]
#[path = "lib_test.rs"]
mod tests;
