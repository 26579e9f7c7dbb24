//! Per-connection message store.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::graph::ReferenceGraph;
use crate::message::Message;
use crate::uri::Uri;

/// Outcome of admitting a message into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The message was not known before.
    Added,
    /// The message was known; local annotations were merged.
    Updated,
    /// The message was known and nothing changed.
    Unchanged,
}

/// All known messages of one connection, keyed by local URI.
///
/// The store is append-only: once admitted, a message's kind and references
/// never change. Only delivery annotations, the unread flag and a missing
/// remote URI may be filled in later.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    messages: HashMap<Uri, Message>,
    /// Remote URI -> local URI.
    remote_index: HashMap<Uri, Uri>,
    /// Bumped on every change.
    version: u64,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a message.
    ///
    /// A message already present under the same URI only contributes its
    /// delivery flags (which are OR-ed in), its remote URI if the stored copy
    /// has none, and a cleared unread flag.
    pub fn insert(&mut self, msg: Message) -> Admission {
        match self.messages.get_mut(&msg.uri) {
            None => {
                trace!(uri = %msg.uri, kind = msg.kind.name(), "admitting message");
                if let Some(remote) = &msg.remote_uri {
                    self.remote_index.insert(remote.clone(), msg.uri.clone());
                }
                self.messages.insert(msg.uri.clone(), msg);
                self.version += 1;
                Admission::Added
            }
            Some(existing) => {
                if existing.kind != msg.kind {
                    debug!(uri = %msg.uri, "ignoring conflicting redelivery of stored message");
                }
                let before = (existing.delivery, existing.remote_uri.clone(), existing.unread);

                existing.delivery.is_received_by_own |= msg.delivery.is_received_by_own;
                existing.delivery.is_received_by_remote |= msg.delivery.is_received_by_remote;
                if msg.delivery.is_received_by_own || msg.delivery.is_received_by_remote {
                    existing.delivery.failed_to_send = false;
                }
                if existing.remote_uri.is_none() {
                    if let Some(remote) = msg.remote_uri {
                        self.remote_index.insert(remote.clone(), existing.uri.clone());
                        existing.remote_uri = Some(remote);
                    }
                }
                existing.unread &= msg.unread;

                if before == (existing.delivery, existing.remote_uri.clone(), existing.unread) {
                    Admission::Unchanged
                } else {
                    self.version += 1;
                    Admission::Updated
                }
            }
        }
    }

    /// Get a message by its local URI.
    pub fn get(&self, uri: &Uri) -> Option<&Message> {
        self.messages.get(uri)
    }

    /// Find a message by either its local or its remote URI.
    pub fn find(&self, uri: &Uri) -> Option<&Message> {
        self.messages
            .get(uri)
            .or_else(|| self.remote_index.get(uri).and_then(|local| self.messages.get(local)))
    }

    /// Whether a message is known under either URI.
    pub fn contains(&self, uri: &Uri) -> bool {
        self.find(uri).is_some()
    }

    /// Record that the own node accepted a sent message.
    pub fn mark_received_by_own(&mut self, uri: &Uri, remote_uri: Option<Uri>) -> bool {
        let Some(msg) = self.messages.get_mut(uri) else {
            return false;
        };
        msg.delivery.is_received_by_own = true;
        msg.delivery.failed_to_send = false;
        if msg.remote_uri.is_none() {
            if let Some(remote) = remote_uri {
                self.remote_index.insert(remote.clone(), uri.clone());
                msg.remote_uri = Some(remote);
            }
        }
        self.version += 1;
        true
    }

    /// Record that the counterpart's node received a sent message.
    pub fn mark_received_by_remote(&mut self, uri: &Uri) -> bool {
        self.annotate(uri, |msg| msg.delivery.is_received_by_remote = true)
    }

    /// Record that sending a message failed.
    pub fn mark_failed_to_send(&mut self, uri: &Uri) -> bool {
        self.annotate(uri, |msg| msg.delivery.failed_to_send = true)
    }

    /// Mark a message as read.
    pub fn mark_read(&mut self, uri: &Uri) -> bool {
        self.annotate(uri, |msg| msg.unread = false)
    }

    fn annotate(&mut self, uri: &Uri, f: impl FnOnce(&mut Message)) -> bool {
        match self.messages.get_mut(uri) {
            Some(msg) => {
                f(msg);
                self.version += 1;
                true
            }
            None => false,
        }
    }

    /// Whether any message is unread.
    pub fn has_unread(&self) -> bool {
        self.messages.values().any(|m| m.unread)
    }

    /// Iterate over all messages in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.values()
    }

    /// All messages ordered by date, ties broken by URI.
    pub fn sorted(&self) -> Vec<&Message> {
        let mut msgs: Vec<&Message> = self.messages.values().collect();
        msgs.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.uri.cmp(&b.uri)));
        msgs
    }

    /// Build the reference graph over the current contents.
    pub fn graph(&self) -> ReferenceGraph<'_> {
        ReferenceGraph::build(self)
    }

    /// Number of messages.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Change counter; differs whenever contents differ.
    pub fn version(&self) -> u64 {
        self.version
    }
}

impl Extend<Message> for MessageStore {
    fn extend<T: IntoIterator<Item = Message>>(&mut self, iter: T) {
        for msg in iter {
            self.insert(msg);
        }
    }
}

impl FromIterator<Message> for MessageStore {
    fn from_iter<T: IntoIterator<Item = Message>>(iter: T) -> Self {
        let mut store = Self::new();
        store.extend(iter);
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Direction, ReferenceKind, References};

    #[test]
    fn insert_and_find_by_remote_uri() {
        let mut store = MessageStore::new();
        let msg = Message::chat("a", Direction::Outgoing, References::default()).with_remote_uri("a-remote");

        assert_eq!(store.insert(msg), Admission::Added);
        assert!(store.find(&Uri::from("a-remote")).is_some());
        assert!(store.get(&Uri::from("a-remote")).is_none());
    }

    #[test]
    fn redelivery_does_not_replace_references() {
        let mut store = MessageStore::new();
        let original = Message::chat(
            "b",
            Direction::Incoming,
            References::default().with(ReferenceKind::Proposes, "a"),
        );
        store.insert(original);

        let mut tampered = Message::chat(
            "b",
            Direction::Incoming,
            References::default().with(ReferenceKind::Rejects, "a"),
        );
        tampered.delivery.is_received_by_remote = true;
        assert_eq!(store.insert(tampered), Admission::Updated);

        let stored = store.get(&Uri::from("b")).unwrap();
        assert!(stored.references().has(ReferenceKind::Proposes));
        assert!(!stored.references().has(ReferenceKind::Rejects));
        assert!(stored.delivery.is_received_by_remote);
    }

    #[test]
    fn identical_redelivery_is_unchanged() {
        let mut store = MessageStore::new();
        let msg = Message::chat("a", Direction::Outgoing, References::default());
        store.insert(msg.clone());
        let version = store.version();

        assert_eq!(store.insert(msg), Admission::Unchanged);
        assert_eq!(store.version(), version);
    }

    #[test]
    fn echo_fills_in_remote_uri() {
        let mut store = MessageStore::new();
        store.insert(Message::chat("a", Direction::Outgoing, References::default()));

        assert!(store.mark_received_by_own(&Uri::from("a"), Some(Uri::from("a-remote"))));
        let msg = store.find(&Uri::from("a-remote")).unwrap();
        assert!(msg.delivery.is_received_by_own);
        assert!(!msg.delivery.failed_to_send);
    }

    #[test]
    fn sorted_orders_by_date() {
        let store: MessageStore = vec![
            Message::chat("late", Direction::Outgoing, References::default()).with_date(20),
            Message::chat("early", Direction::Incoming, References::default()).with_date(10),
        ]
        .into_iter()
        .collect();

        let uris: Vec<_> = store.sorted().iter().map(|m| m.uri.as_str().to_string()).collect();
        assert_eq!(uris, vec!["early", "late"]);
    }
}
