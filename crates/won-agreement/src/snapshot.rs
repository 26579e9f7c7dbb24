//! Agreement snapshot of a connection.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use won_protocol::actions::is_agreeable;
use won_protocol::{Message, ReferenceGraph, ReferenceKind, Uri};

/// The two ends of the mirror chain realizing an agreement event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementRef {
    /// First copy reached, as named by the server.
    pub head_uri: Uri,
    /// Most recent copy, the one to display.
    pub state_uri: Uri,
}

impl AgreementRef {
    /// An event with no mirror copy.
    pub fn direct(uri: Uri) -> Self {
        Self {
            head_uri: uri.clone(),
            state_uri: uri,
        }
    }
}

/// Reconciled agreement view of one connection.
///
/// After reconciliation the three primary sets are pairwise disjoint:
/// agreements, pending proposals and cancellation-pending agreements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementSnapshot {
    pub agreement_uris: BTreeSet<Uri>,
    pub pending_proposal_uris: BTreeSet<Uri>,
    pub cancellation_pending_agreement_uris: BTreeSet<Uri>,
    pub cancelled_agreement_uris: BTreeSet<Uri>,
    pub accepted_cancellation_proposal_uris: BTreeSet<Uri>,
    pub rejected_message_uris: BTreeSet<Uri>,
    pub retracted_message_uris: BTreeSet<Uri>,
    /// Head/state pairs of every resolved entry of the primary sets.
    pub refs: BTreeMap<Uri, AgreementRef>,
}

impl AgreementSnapshot {
    /// Whether nothing is agreed, pending or being cancelled.
    pub fn is_empty(&self) -> bool {
        self.agreement_uris.is_empty()
            && self.pending_proposal_uris.is_empty()
            && self.cancellation_pending_agreement_uris.is_empty()
    }

    /// Every URI of the primary sets.
    pub fn primary_uris(&self) -> impl Iterator<Item = &Uri> {
        self.agreement_uris
            .iter()
            .chain(&self.pending_proposal_uris)
            .chain(&self.cancellation_pending_agreement_uris)
    }

    /// The copy to display for an entry of the primary sets.
    pub fn state_uri<'a>(&'a self, uri: &'a Uri) -> &'a Uri {
        self.refs.get(uri).map_or(uri, |r| &r.state_uri)
    }

    /// Whether a protocol message has been overtaken by later events and can
    /// be hidden: it was cancelled, retracted or rejected, or is an accepted
    /// cancellation proposal.
    pub fn is_superseded(&self, msg: &Message) -> bool {
        let sets = [
            &self.cancelled_agreement_uris,
            &self.accepted_cancellation_proposal_uris,
            &self.retracted_message_uris,
            &self.rejected_message_uris,
        ];
        sets.iter().any(|set| set.iter().any(|uri| msg.is_known_as(uri)))
    }

    /// Digest over all sets, stable across runs.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        let sets = [
            ("agreementUris", &self.agreement_uris),
            ("pendingProposalUris", &self.pending_proposal_uris),
            ("cancellationPendingAgreementUris", &self.cancellation_pending_agreement_uris),
            ("cancelledAgreementUris", &self.cancelled_agreement_uris),
            ("acceptedCancellationProposalUris", &self.accepted_cancellation_proposal_uris),
            ("rejectedMessageUris", &self.rejected_message_uris),
            ("retractedMessageUris", &self.retracted_message_uris),
        ];
        for (label, set) in sets {
            hasher.update(label.as_bytes());
            hasher.update(&(set.len() as u64).to_le_bytes());
            for uri in set {
                hasher.update(uri.as_str().as_bytes());
                hasher.update(b"\n");
                if let Some(r) = self.refs.get(uri) {
                    hasher.update(r.head_uri.as_str().as_bytes());
                    hasher.update(b" ");
                    hasher.update(r.state_uri.as_str().as_bytes());
                }
                hasher.update(b"\n");
            }
        }
        hex::encode(hasher.finalize().as_bytes())
    }

    /// Whether the agreement sets of two snapshots classify the same events,
    /// ignoring head/state resolution.
    pub fn same_classification(&self, other: &Self) -> bool {
        self.agreement_uris == other.agreement_uris
            && self.pending_proposal_uris == other.pending_proposal_uris
            && self.cancellation_pending_agreement_uris == other.cancellation_pending_agreement_uris
            && self.cancelled_agreement_uris == other.cancelled_agreement_uris
    }
}

/// Derive the agreement view from the local message graph alone.
///
/// Once every referenced message is loaded this agrees with the server's
/// classification.
pub fn local_snapshot(graph: &ReferenceGraph<'_>) -> AgreementSnapshot {
    let mut snapshot = AgreementSnapshot::default();
    for msg in graph.store().iter() {
        let status = graph.status(msg);
        let refs = msg.references();
        let uri = msg.uri.clone();

        if status.is_agreed {
            snapshot.agreement_uris.insert(uri.clone());
        }
        if status.is_cancellation_pending {
            snapshot.cancellation_pending_agreement_uris.insert(uri.clone());
        }
        if status.is_cancelled {
            snapshot.cancelled_agreement_uris.insert(uri.clone());
        }
        if status.is_rejected {
            snapshot.rejected_message_uris.insert(uri.clone());
        }
        if status.is_retracted {
            snapshot.retracted_message_uris.insert(uri.clone());
        }
        if is_agreeable(msg, &status) && refs.has(ReferenceKind::Proposes) {
            snapshot.pending_proposal_uris.insert(uri.clone());
        }
        if status.is_accepted && refs.has(ReferenceKind::ProposesToCancel) {
            snapshot.accepted_cancellation_proposal_uris.insert(uri.clone());
        }
    }
    let primary: Vec<Uri> = snapshot.primary_uris().cloned().collect();
    for uri in primary {
        snapshot.refs.insert(uri.clone(), AgreementRef::direct(uri));
    }
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;
    use won_protocol::{Direction, MessageStore, References};

    fn refers(uri: &str, direction: Direction, kind: ReferenceKind, target: &str) -> Message {
        Message::chat(uri, direction, References::default().with(kind, target))
    }

    #[test]
    fn fingerprint_is_deterministic_and_sensitive() {
        let mut a = AgreementSnapshot::default();
        a.agreement_uris.insert(Uri::from("x"));
        let b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let mut c = a.clone();
        c.agreement_uris.clear();
        c.pending_proposal_uris.insert(Uri::from("x"));
        assert_ne!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn superseded_matches_remote_uri() {
        let mut snapshot = AgreementSnapshot::default();
        snapshot.retracted_message_uris.insert(Uri::from("theirs"));
        let msg = Message::chat("mine", Direction::Outgoing, References::default()).with_remote_uri("theirs");
        assert!(snapshot.is_superseded(&msg));

        let other = Message::chat("other", Direction::Outgoing, References::default());
        assert!(!snapshot.is_superseded(&other));
    }

    #[test]
    fn local_snapshot_tracks_lifecycle() {
        let mut store = MessageStore::new();
        store.insert(Message::chat("a", Direction::Outgoing, References::default()));
        store.insert(refers("p", Direction::Outgoing, ReferenceKind::Proposes, "a"));

        let snapshot = local_snapshot(&store.graph());
        assert_eq!(snapshot.pending_proposal_uris, BTreeSet::from([Uri::from("p")]));
        assert!(snapshot.agreement_uris.is_empty());

        store.insert(refers("acc", Direction::Incoming, ReferenceKind::Accepts, "p"));
        let snapshot = local_snapshot(&store.graph());
        assert_eq!(snapshot.agreement_uris, BTreeSet::from([Uri::from("p")]));
        assert!(snapshot.pending_proposal_uris.is_empty());

        store.insert(refers("ptc", Direction::Incoming, ReferenceKind::ProposesToCancel, "p"));
        let snapshot = local_snapshot(&store.graph());
        assert!(snapshot.agreement_uris.is_empty());
        assert_eq!(snapshot.cancellation_pending_agreement_uris, BTreeSet::from([Uri::from("p")]));
        assert_eq!(snapshot.state_uri(&Uri::from("p")), &Uri::from("p"));
    }
}
