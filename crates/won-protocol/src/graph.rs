//! Inverse reference index over a message store.

use std::collections::HashMap;

use crate::message::{Message, ReferenceKind};
use crate::store::MessageStore;
use crate::uri::Uri;

/// Read-only view answering "which messages point at `m` under kind `k`".
///
/// A reference may name either side's URI for the same event, so lookups
/// consult both the local and the remote URI of the target. References to
/// messages that are not (yet) in the store are kept in the index and simply
/// never match anything until the target arrives.
#[derive(Debug)]
pub struct ReferenceGraph<'a> {
    store: &'a MessageStore,
    inverse: HashMap<ReferenceKind, HashMap<&'a Uri, Vec<&'a Message>>>,
}

impl<'a> ReferenceGraph<'a> {
    /// Index every reference in the store.
    pub fn build(store: &'a MessageStore) -> Self {
        let mut inverse: HashMap<ReferenceKind, HashMap<&'a Uri, Vec<&'a Message>>> = HashMap::new();
        for msg in store.iter() {
            for (kind, target) in msg.references().iter() {
                inverse
                    .entry(kind)
                    .or_default()
                    .entry(target)
                    .or_default()
                    .push(msg);
            }
        }
        for referrers in inverse.values_mut().flat_map(|by_target| by_target.values_mut()) {
            referrers.sort_by(|a, b| a.uri.cmp(&b.uri));
        }
        Self { store, inverse }
    }

    /// The underlying store.
    pub fn store(&self) -> &'a MessageStore {
        self.store
    }

    /// Look up a message by local or remote URI.
    pub fn message(&self, uri: &Uri) -> Option<&'a Message> {
        self.store.find(uri)
    }

    /// Messages that reference `target` under `kind`.
    pub fn referrers(&self, target: &Message, kind: ReferenceKind) -> Vec<&'a Message> {
        let Some(by_target) = self.inverse.get(&kind) else {
            return Vec::new();
        };
        let mut out: Vec<&'a Message> = by_target.get(&target.uri).cloned().unwrap_or_default();
        if let Some(remote) = &target.remote_uri {
            if let Some(more) = by_target.get(remote) {
                for msg in more {
                    if !out.iter().any(|m| m.uri == msg.uri) {
                        out.push(*msg);
                    }
                }
            }
        }
        out
    }

    /// Whether anything references `target` under `kind`.
    pub fn is_referenced(&self, target: &Message, kind: ReferenceKind) -> bool {
        let Some(by_target) = self.inverse.get(&kind) else {
            return false;
        };
        by_target.contains_key(&target.uri)
            || target
                .remote_uri
                .as_ref()
                .is_some_and(|remote| by_target.contains_key(remote))
    }

    /// Messages `source` references under `kind` that are present in the store.
    pub fn targets(&self, source: &Message, kind: ReferenceKind) -> Vec<&'a Message> {
        source
            .references()
            .get(kind)
            .iter()
            .filter_map(|uri| self.store.find(uri))
            .collect()
    }

    /// References from messages in the store to URIs that are not in it.
    pub fn dangling(&self) -> Vec<(ReferenceKind, &'a Uri)> {
        let mut out: Vec<(ReferenceKind, &'a Uri)> = self
            .inverse
            .iter()
            .flat_map(|(kind, by_target)| by_target.keys().map(move |uri| (*kind, *uri)))
            .filter(|(_, uri)| !self.store.contains(uri))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Direction, References};

    fn store() -> MessageStore {
        vec![
            Message::chat("a", Direction::Outgoing, References::default()).with_remote_uri("a'"),
            Message::chat(
                "b",
                Direction::Incoming,
                References::default().with(ReferenceKind::Proposes, "a'"),
            ),
            Message::chat(
                "c",
                Direction::Outgoing,
                References::default()
                    .with(ReferenceKind::Proposes, "a")
                    .with(ReferenceKind::Accepts, "missing"),
            ),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn referrers_match_local_and_remote_uri() {
        let store = store();
        let graph = store.graph();
        let a = graph.message(&Uri::from("a")).unwrap();

        let proposers: Vec<_> = graph
            .referrers(a, ReferenceKind::Proposes)
            .iter()
            .map(|m| m.uri.as_str().to_string())
            .collect();
        assert_eq!(proposers, vec!["c", "b"]);
        assert!(graph.is_referenced(a, ReferenceKind::Proposes));
        assert!(!graph.is_referenced(a, ReferenceKind::Claims));
    }

    #[test]
    fn dangling_references_are_reported_not_resolved() {
        let store = store();
        let graph = store.graph();
        assert_eq!(graph.dangling(), vec![(ReferenceKind::Accepts, &Uri::from("missing"))]);

        let c = graph.message(&Uri::from("c")).unwrap();
        assert!(graph.targets(c, ReferenceKind::Accepts).is_empty());
        assert_eq!(graph.targets(c, ReferenceKind::Proposes).len(), 1);
    }
}
