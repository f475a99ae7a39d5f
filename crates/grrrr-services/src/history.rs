use std::sync::Arc;

use bytes::Bytes;
use grrrr_core::message::{ChatMessage, History, HistoryError};

use crate::seq_buffer::SeqBuffer;

/// Local broadcast history, shared by the chat listener, the console and the
/// transfer engine.
#[derive(Clone, Default)]
pub struct HistoryStore {
    messages: Arc<SeqBuffer<ChatMessage>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self {
            messages: Arc::new(SeqBuffer::new()),
        }
    }

    /// Record a message. Private messages are not kept.
    pub fn add(&self, message: ChatMessage) {
        if message.broadcast {
            self.messages.append(message);
        }
    }

    /// Ordered copy of the current history.
    pub fn snapshot(&self) -> History {
        History::new(self.messages.snapshot())
    }

    /// Swap in a history received from a peer.
    pub fn replace(&self, history: History) {
        self.messages.replace_all(history.messages);
    }

    /// Serialize the current history for transfer.
    pub fn to_blob(&self) -> Result<Bytes, HistoryError> {
        self.snapshot().to_blob()
    }

    pub fn count(&self) -> usize {
        self.messages.len()
    }
}
