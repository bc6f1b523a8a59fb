//! Call correlation by dialog identifier.

use std::collections::HashMap;
use std::sync::mpsc::Sender;
use std::sync::{Arc, RwLock};

use super::MessageConsumer;
use crate::domain::{Call, Message};
use crate::header::SyntheticHeader;

#[derive(Debug, Default)]
struct Calls {
    /// Calls in order of first appearance
    list: Vec<Arc<Call>>,
    by_id: HashMap<String, usize>,
}

/// Shared, append-only collection of calls.
///
/// Clones share the same calls, so one handle can live on the capture
/// thread while another is read by the UI.
#[derive(Debug, Clone, Default)]
pub struct CallStore {
    calls: Arc<RwLock<Calls>>,
    publisher: Option<Sender<Arc<Message>>>,
}

impl CallStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish every placed message on `tx`.
    pub fn with_publisher(mut self, tx: Sender<Arc<Message>>) -> Self {
        self.publisher = Some(tx);
        self
    }

    /// Snapshot of all calls in order of first appearance.
    pub fn calls(&self) -> Vec<Arc<Call>> {
        self.calls
            .read()
            .map(|calls| calls.list.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().list.clone())
    }

    /// Number of calls seen so far.
    pub fn len(&self) -> usize {
        self.calls
            .read()
            .map(|calls| calls.list.len())
            .unwrap_or_else(|poisoned| poisoned.into_inner().list.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a call by its identifier.
    pub fn get(&self, call_id: &str) -> Option<Arc<Call>> {
        let calls = self
            .calls
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        calls.by_id.get(call_id).map(|&i| Arc::clone(&calls.list[i]))
    }

    fn get_or_insert(&self, call_id: &str) -> Arc<Call> {
        let mut calls = self
            .calls
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(&i) = calls.by_id.get(call_id) {
            return Arc::clone(&calls.list[i]);
        }

        tracing::debug!("New call {}", call_id);
        let call = Arc::new(Call::new(call_id));
        let index = calls.list.len();
        calls.list.push(Arc::clone(&call));
        calls.by_id.insert(call_id.to_string(), index);
        call
    }
}

impl MessageConsumer for CallStore {
    fn submit(&mut self, header: &str, payload: &str) -> Option<Arc<Message>> {
        let header = SyntheticHeader::parse(header)?;
        let call_id = find_call_id(payload)?;
        let summary = payload.lines().next().unwrap_or_default().trim_end();
        if summary.is_empty() {
            return None;
        }

        let call = self.get_or_insert(call_id);
        let message = Arc::new(Message {
            call_id: call_id.to_string(),
            timestamp: header.timestamp,
            src: header.src,
            dst: header.dst,
            summary: summary.to_string(),
            payload: payload.to_string(),
        });
        call.push(Arc::clone(&message));

        if let Some(tx) = &self.publisher {
            // The UI may already be gone during shutdown
            let _ = tx.send(Arc::clone(&message));
        }

        Some(message)
    }
}

/// Find the `Call-ID` (or compact `i`) header value in a message.
fn find_call_id(payload: &str) -> Option<&str> {
    payload
        .lines()
        .skip(1)
        .take_while(|line| !line.trim().is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            let name = name.trim();
            if name.eq_ignore_ascii_case("Call-ID") || name.eq_ignore_ascii_case("i") {
                let value = value.trim();
                (!value.is_empty()).then_some(value)
            } else {
                None
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    const HEADER_A: &str = "U 2024/01/15 10:30:00.123456 10.0.0.1:5060 -> 10.0.0.2:5060";
    const HEADER_B: &str = "U 2024/01/15 10:30:00.223456 10.0.0.2:5060 -> 10.0.0.1:5060";

    fn invite(call_id: &str) -> String {
        format!(
            "INVITE sip:bob@example.com SIP/2.0\r\n\
             Via: SIP/2.0/UDP 10.0.0.1:5060\r\n\
             Call-ID: {}\r\n\
             CSeq: 1 INVITE\r\n\
             \r\n",
            call_id
        )
    }

    #[test]
    fn test_messages_grouped_by_call_id() {
        let mut store = CallStore::new();

        let first = store.submit(HEADER_A, &invite("abc@host")).unwrap();
        let reply = "SIP/2.0 200 OK\r\ncall-id: abc@host\r\n\r\n";
        store.submit(HEADER_B, reply).unwrap();
        store.submit(HEADER_A, &invite("other@host")).unwrap();

        assert_eq!(store.len(), 2);
        let call = store.get("abc@host").unwrap();
        assert_eq!(call.len(), 2);
        assert_eq!(first.summary, "INVITE sip:bob@example.com SIP/2.0");
        assert_eq!(first.timestamp, "2024/01/15 10:30:00.123456");
        assert_eq!(call.message(1).unwrap().summary, "SIP/2.0 200 OK");
        assert_eq!(call.message(1).unwrap().src.to_string(), "10.0.0.2:5060");
    }

    #[test]
    fn test_compact_call_id() {
        let mut store = CallStore::new();
        let msg = store
            .submit(HEADER_A, "BYE sip:bob SIP/2.0\r\ni: compact-1\r\n\r\n")
            .unwrap();
        assert_eq!(msg.call_id(), "compact-1");
    }

    #[test]
    fn test_rejects_without_call_id() {
        let mut store = CallStore::new();
        assert!(store.submit(HEADER_A, "hello world\r\n").is_none());
        // A Call-ID in the body does not count
        assert!(store
            .submit(HEADER_A, "MESSAGE sip:a SIP/2.0\r\n\r\nCall-ID: body\r\n")
            .is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_rejects_bad_header() {
        let mut store = CallStore::new();
        assert!(store.submit("garbage", &invite("abc")).is_none());
    }

    #[test]
    fn test_publishes_placed_messages() {
        let (tx, rx) = mpsc::channel();
        let mut store = CallStore::new().with_publisher(tx);

        store.submit(HEADER_A, &invite("abc")).unwrap();
        assert!(store.submit(HEADER_A, "nothing").is_none());

        let published = rx.try_recv().unwrap();
        assert_eq!(published.call_id(), "abc");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_clones_share_calls() {
        let mut capture_side = CallStore::new();
        let ui_side = capture_side.clone();

        capture_side.submit(HEADER_A, &invite("abc")).unwrap();
        assert_eq!(ui_side.calls().len(), 1);
        assert_eq!(ui_side.calls()[0].id(), "abc");
    }
}
