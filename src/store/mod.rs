//! Message consumers.
//!
//! The capture pipeline hands every extracted datagram to a
//! [`MessageConsumer`]. [`CallStore`] is the bundled consumer: it groups
//! messages into calls by their `Call-ID` and publishes each new message to
//! the presentation side.

mod call_store;

pub use call_store::CallStore;

use std::sync::Arc;

use crate::domain::Message;

/// Receives `(header, payload)` pairs and places them into calls.
///
/// Returns the placed message, or `None` if the payload was declined.
pub trait MessageConsumer {
    fn submit(&mut self, header: &str, payload: &str) -> Option<Arc<Message>>;
}

impl<F> MessageConsumer for F
where
    F: FnMut(&str, &str) -> Option<Arc<Message>>,
{
    fn submit(&mut self, header: &str, payload: &str) -> Option<Arc<Message>> {
        self(header, payload)
    }
}
