//! Derived message status.
//!
//! Status is never stored. It is recomputed from the reference graph every
//! time it is asked for, so out-of-order arrival only ever changes the answer
//! and never leaves a stale flag behind.
//!
//! # Rules
//!
//! For a message `m`:
//!
//! - **rejected**: some message references `m` via `rejects`.
//! - **retracted**: `m` is outgoing and some outgoing message references it
//!   via `retracts`. Only the author may retract.
//! - **proposed** / **claimed**: referenced via `proposes` / `claims`, and
//!   neither retracted nor rejected.
//! - **accepted**: referenced via `accepts` by a content-bearing message that
//!   is itself neither rejected nor retracted.
//! - cancellation proposals of `m` are the `proposesToCancel` referrers of `m`
//!   or of any of its valid accepts, minus rejected/retracted ones.
//! - **cancelled**: accepted, and one of its cancellation proposals is
//!   accepted.
//! - **cancellation pending**: accepted, not cancelled, and some cancellation
//!   proposal is still unaccepted.
//! - **agreed**: accepted, not cancellation pending, not cancelled.

use serde::Serialize;

use crate::graph::ReferenceGraph;
use crate::message::{Message, ReferenceKind};
use crate::uri::Uri;

/// Boolean status flags of one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageStatus {
    pub is_proposed: bool,
    pub is_claimed: bool,
    pub is_accepted: bool,
    pub is_agreed: bool,
    pub is_rejected: bool,
    pub is_retracted: bool,
    pub is_cancelled: bool,
    pub is_cancellation_pending: bool,
}

impl<'a> ReferenceGraph<'a> {
    /// Derive the status of a message.
    pub fn status(&self, msg: &Message) -> MessageStatus {
        let is_rejected = self.is_rejected(msg);
        let is_retracted = self.is_retracted(msg);
        let withdrawn = is_rejected || is_retracted;

        let accepts = self.valid_accepts(msg);
        let is_accepted = !accepts.is_empty();

        let (is_cancelled, is_cancellation_pending) = if is_accepted {
            let cancellations = self.cancellation_proposals(msg, &accepts);
            let cancelled = cancellations.iter().any(|c| !self.valid_accepts(c).is_empty());
            let pending = !cancelled && !cancellations.is_empty();
            (cancelled, pending)
        } else {
            (false, false)
        };

        MessageStatus {
            is_proposed: !withdrawn && self.is_referenced(msg, ReferenceKind::Proposes),
            is_claimed: !withdrawn && self.is_referenced(msg, ReferenceKind::Claims),
            is_accepted,
            is_agreed: is_accepted && !is_cancellation_pending && !is_cancelled,
            is_rejected,
            is_retracted,
            is_cancelled,
            is_cancellation_pending,
        }
    }

    /// Derive the status of a message by URI; `None` if it is not loaded.
    pub fn status_of(&self, uri: &Uri) -> Option<MessageStatus> {
        self.message(uri).map(|msg| self.status(msg))
    }

    fn is_rejected(&self, msg: &Message) -> bool {
        self.is_referenced(msg, ReferenceKind::Rejects)
    }

    fn is_retracted(&self, msg: &Message) -> bool {
        msg.is_outgoing()
            && self
                .referrers(msg, ReferenceKind::Retracts)
                .iter()
                .any(|r| r.is_outgoing())
    }

    fn is_withdrawn(&self, msg: &Message) -> bool {
        self.is_rejected(msg) || self.is_retracted(msg)
    }

    fn valid_accepts(&self, msg: &Message) -> Vec<&'a Message> {
        self.referrers(msg, ReferenceKind::Accepts)
            .into_iter()
            .filter(|a| a.has_content && !self.is_withdrawn(a))
            .collect()
    }

    fn cancellation_proposals(&self, msg: &Message, accepts: &[&'a Message]) -> Vec<&'a Message> {
        let mut out = self.referrers(msg, ReferenceKind::ProposesToCancel);
        for accept in accepts {
            for c in self.referrers(accept, ReferenceKind::ProposesToCancel) {
                if !out.iter().any(|m| m.uri == c.uri) {
                    out.push(c);
                }
            }
        }
        out.retain(|c| !self.is_withdrawn(c));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Direction, References};
    use crate::store::MessageStore;
    use proptest::prelude::*;

    fn content(uri: &str, direction: Direction) -> Message {
        Message::chat(uri, direction, References::default())
    }

    fn refers(uri: &str, direction: Direction, kind: ReferenceKind, target: &str) -> Message {
        Message::chat(uri, direction, References::default().with(kind, target))
    }

    fn status(store: &MessageStore, uri: &str) -> MessageStatus {
        store.graph().status_of(&Uri::from(uri)).unwrap()
    }

    #[test]
    fn proposal_then_retraction() {
        let mut store = MessageStore::new();
        store.insert(content("a", Direction::Outgoing));
        store.insert(refers("b", Direction::Incoming, ReferenceKind::Proposes, "a"));
        assert!(status(&store, "a").is_proposed);

        store.insert(refers("c", Direction::Outgoing, ReferenceKind::Retracts, "a"));
        let s = status(&store, "a");
        assert!(!s.is_proposed);
        assert!(s.is_retracted);
    }

    #[test]
    fn incoming_retraction_of_own_message_does_not_count() {
        let mut store = MessageStore::new();
        store.insert(content("a", Direction::Outgoing));
        store.insert(refers("x", Direction::Incoming, ReferenceKind::Retracts, "a"));
        assert!(!status(&store, "a").is_retracted);
    }

    #[test]
    fn accept_without_content_is_ignored() {
        let mut store = MessageStore::new();
        store.insert(refers("p", Direction::Outgoing, ReferenceKind::Proposes, "a"));
        store.insert(refers("acc", Direction::Incoming, ReferenceKind::Accepts, "p").with_content(false));
        assert!(!status(&store, "p").is_accepted);
    }

    #[test]
    fn rejected_accept_does_not_accept() {
        let mut store = MessageStore::new();
        store.insert(refers("p", Direction::Outgoing, ReferenceKind::Proposes, "a"));
        store.insert(refers("acc", Direction::Incoming, ReferenceKind::Accepts, "p"));
        store.insert(refers("rej", Direction::Outgoing, ReferenceKind::Rejects, "acc"));
        assert!(!status(&store, "p").is_accepted);
    }

    #[test]
    fn propose_accept_cancel_accept_round_trip() {
        let mut store = MessageStore::new();
        store.insert(content("a", Direction::Outgoing));
        store.insert(refers("p", Direction::Outgoing, ReferenceKind::Proposes, "a"));
        store.insert(refers("acc", Direction::Incoming, ReferenceKind::Accepts, "p"));

        let agreed = status(&store, "p");
        assert!(agreed.is_accepted && agreed.is_agreed);

        store.insert(refers("ptc", Direction::Incoming, ReferenceKind::ProposesToCancel, "acc"));
        let pending = status(&store, "p");
        assert!(pending.is_cancellation_pending);
        assert!(!pending.is_agreed);

        store.insert(refers("acc2", Direction::Outgoing, ReferenceKind::Accepts, "ptc"));
        let cancelled = status(&store, "p");
        assert!(!cancelled.is_agreed);
        assert!(cancelled.is_cancelled);
        assert!(!cancelled.is_cancellation_pending);
        assert!(cancelled.is_accepted);
    }

    #[test]
    fn cancellation_may_target_proposal_directly() {
        let mut store = MessageStore::new();
        store.insert(refers("p", Direction::Outgoing, ReferenceKind::Proposes, "a"));
        store.insert(refers("acc", Direction::Incoming, ReferenceKind::Accepts, "p"));
        store.insert(refers("ptc", Direction::Outgoing, ReferenceKind::ProposesToCancel, "p"));
        assert!(status(&store, "p").is_cancellation_pending);
    }

    #[test]
    fn retracted_cancellation_restores_agreement() {
        let mut store = MessageStore::new();
        store.insert(refers("p", Direction::Outgoing, ReferenceKind::Proposes, "a"));
        store.insert(refers("acc", Direction::Incoming, ReferenceKind::Accepts, "p"));
        store.insert(refers("ptc", Direction::Outgoing, ReferenceKind::ProposesToCancel, "p"));
        store.insert(refers("r", Direction::Outgoing, ReferenceKind::Retracts, "ptc"));
        assert!(status(&store, "p").is_agreed);
    }

    #[test]
    fn references_via_remote_uri_count() {
        let mut store = MessageStore::new();
        store.insert(content("a", Direction::Outgoing).with_remote_uri("a-theirs"));
        store.insert(refers("c", Direction::Incoming, ReferenceKind::Claims, "a-theirs"));
        assert!(status(&store, "a").is_claimed);
    }

    #[test]
    fn reference_to_unloaded_message_is_harmless() {
        let mut store = MessageStore::new();
        store.insert(refers("b", Direction::Incoming, ReferenceKind::Accepts, "not-loaded"));
        assert_eq!(status(&store, "b"), MessageStatus::default());
        assert!(store.graph().status_of(&Uri::from("not-loaded")).is_none());
    }

    #[test]
    fn out_of_order_arrival_converges() {
        let msgs = vec![
            content("a", Direction::Outgoing),
            refers("p", Direction::Outgoing, ReferenceKind::Proposes, "a"),
            refers("acc", Direction::Incoming, ReferenceKind::Accepts, "p"),
        ];
        let forward: MessageStore = msgs.clone().into_iter().collect();
        let backward: MessageStore = msgs.into_iter().rev().collect();
        assert_eq!(status(&forward, "p"), status(&backward, "p"));
    }

    fn arb_graph() -> impl Strategy<Value = MessageStore> {
        let kinds = prop::sample::select(ReferenceKind::ALL.to_vec());
        let edge = (0usize..8, kinds, 0usize..8);
        (
            prop::collection::vec((any::<bool>(), any::<bool>()), 8),
            prop::collection::vec(edge, 0..24),
        )
            .prop_map(|(nodes, edges)| {
                let mut refs: Vec<References> = vec![References::default(); nodes.len()];
                for (from, kind, to) in edges {
                    if from != to {
                        refs[from].insert(kind, Uri::new(format!("m{to}")));
                    }
                }
                nodes
                    .into_iter()
                    .zip(refs)
                    .enumerate()
                    .map(|(i, ((outgoing, has_content), r))| {
                        Message::chat(format!("m{i}"), Direction::from_outgoing(outgoing), r)
                            .with_content(has_content)
                    })
                    .collect()
            })
    }

    proptest! {
        #[test]
        fn status_implications_hold(store in arb_graph()) {
            let graph = store.graph();
            for msg in store.iter() {
                let s = graph.status(msg);
                prop_assert!(!s.is_agreed || s.is_accepted);
                prop_assert!(!s.is_cancelled || s.is_accepted);
                prop_assert!(!s.is_retracted || msg.is_outgoing());
                prop_assert!(!(s.is_cancelled && s.is_cancellation_pending));
                prop_assert!(!(s.is_proposed && (s.is_retracted || s.is_rejected)));
            }
        }
    }
}
