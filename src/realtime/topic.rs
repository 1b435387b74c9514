use std::fmt;

/// Address of a realtime message stream, e.g. `/topic/conversations/42`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Topic(String);

impl Topic {
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Inbound topic of a conversation under `prefix`.
    #[must_use]
    pub fn conversation(prefix: &str, conversation_id: impl fmt::Display) -> Self {
        if prefix.ends_with('/') {
            Self(format!("{prefix}{conversation_id}"))
        } else {
            Self(format!("{prefix}/{conversation_id}"))
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(address: &str) -> Self {
        Self::new(address)
    }
}

impl From<String> for Topic {
    fn from(address: String) -> Self {
        Self(address)
    }
}
