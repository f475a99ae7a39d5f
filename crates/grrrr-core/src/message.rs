//! Chat message schema.
//!
//! `ChatMessage` travels over the stream path one at a time. A `History` is
//! the ordered list of broadcast messages a node has seen; it is serialized
//! to a single blob and moved by the datagram transfer protocol, which never
//! looks inside it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Username of the sender.
    pub from: String,

    pub text: String,

    /// Broadcast messages are kept in history; private ones are not.
    pub broadcast: bool,

    /// Unix timestamp in milliseconds.
    pub timestamp_ms: u64,
}

impl ChatMessage {
    pub fn new(from: impl Into<String>, text: impl Into<String>, broadcast: bool) -> Self {
        let timestamp_ms = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        Self {
            from: from.into(),
            text: text.into(),
            broadcast,
            timestamp_ms,
        }
    }
}

/// Reply to a stream message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reply {
    pub status: u16,
    pub message: String,
}

impl Reply {
    pub const OK: u16 = 200;

    pub fn ok() -> Self {
        Self {
            status: Self::OK,
            message: "OK".to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == Self::OK
    }
}

/// Ordered broadcast history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub messages: Vec<ChatMessage>,
}

impl History {
    pub fn new(messages: Vec<ChatMessage>) -> Self {
        Self { messages }
    }

    /// Serialize to the blob that gets packetized.
    pub fn to_blob(&self) -> Result<Bytes, HistoryError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(HistoryError::Encode)
    }

    /// Parse a reassembled blob.
    pub fn from_blob(blob: &[u8]) -> Result<Self, HistoryError> {
        serde_json::from_slice(blob).map_err(HistoryError::Decode)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("failed to serialize history: {0}")]
    Encode(serde_json::Error),
    #[error("failed to parse history blob: {0}")]
    Decode(serde_json::Error),
}
