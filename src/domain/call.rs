//! Calls and the messages that make them up.

use std::sync::{Arc, RwLock, RwLockReadGuard};

use super::Endpoint;

/// A single signaling message placed into a call.
///
/// Messages are immutable once published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Dialog identifier of the owning call
    pub call_id: String,
    /// Capture time as rendered in the synthetic header
    pub timestamp: String,
    /// Sender
    pub src: Endpoint,
    /// Receiver
    pub dst: Endpoint,
    /// First line of the payload (request line or status line)
    pub summary: String,
    /// Full payload text
    pub payload: String,
}

impl Message {
    /// Identifier of the call this message belongs to.
    pub fn call_id(&self) -> &str {
        &self.call_id
    }
}

/// An ordered, append-only sequence of messages sharing a dialog identifier.
///
/// The capture side appends while the presentation side reads. Each append
/// pushes one fully built `Arc<Message>` under the write lock, so a reader
/// sees a message either complete or not at all.
#[derive(Debug)]
pub struct Call {
    id: String,
    messages: RwLock<Vec<Arc<Message>>>,
}

impl Call {
    /// Create an empty call.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: RwLock::new(Vec::new()),
        }
    }

    /// Dialog identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Append a message to the end of the call.
    pub fn push(&self, message: Arc<Message>) {
        let mut messages = self
            .messages
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        messages.push(message);
    }

    /// Number of messages currently in the call.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Message at `index`, if present.
    pub fn message(&self, index: usize) -> Option<Arc<Message>> {
        self.read().get(index).cloned()
    }

    /// Snapshot of the messages in `start..start + count`, clamped to what
    /// is currently available.
    pub fn window(&self, start: usize, count: usize) -> Vec<Arc<Message>> {
        let messages = self.read();
        let start = start.min(messages.len());
        let end = start.saturating_add(count).min(messages.len());
        messages[start..end].to_vec()
    }

    /// Snapshot of every message.
    pub fn messages(&self) -> Vec<Arc<Message>> {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<Message>>> {
        self.messages
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
