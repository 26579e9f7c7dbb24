//! Reconciliation of server-computed agreement data.
//!
//! # Algorithm
//!
//! 1. Fetch the protocol sets for the connection. This is the only step
//!    whose failure fails the whole reconciliation.
//! 2. Drop cancellation-pending agreements from the agreement set, and
//!    agreements or cancellation-pending entries from the pending proposals,
//!    so the three primary sets are disjoint.
//! 3. Resolve the head/state pair of every primary entry, fetching the
//!    events not already in the local store. When a fetched event is our own
//!    copy addressed to our own atom, its remote counterpart is followed. A
//!    failed resolution is recorded for that URI and the rest proceeds.
//! 4. Drop rejected and retracted events from the pending proposals.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, trace, warn};
use won_protocol::{Message, MessageStore, Uri};

use crate::error::{Error, Result};
use crate::snapshot::{AgreementRef, AgreementSnapshot};
use crate::source::{AgreementProtocolUris, AgreementSource};

/// Default bound on mirror chains followed while resolving an event.
pub const DEFAULT_MAX_DEPTH: usize = 8;

/// Outcome of one reconciliation.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub snapshot: AgreementSnapshot,
    /// Events fetched from the source, ordered by URI. Callers add them to
    /// the connection's store.
    pub fetched: Vec<Message>,
    /// Entries whose head/state could not be resolved.
    pub failures: BTreeMap<Uri, Error>,
    /// Pruning removed rejected or retracted pending proposals.
    pub pruned: bool,
    /// The snapshot's fingerprint differs from the previous one. Pruning
    /// alone does not set this; it is reported in [`pruned`](Self::pruned).
    pub changed: bool,
}

/// Reconciles agreement data of connections against an [`AgreementSource`].
pub struct AgreementAggregator<S> {
    source: S,
    max_depth: usize,
}

impl<S: AgreementSource> AgreementAggregator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth.max(1);
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Reconcile the agreement data of `connection`, owned by `own_atom`.
    ///
    /// `store` is consulted before fetching any event. `previous` is the
    /// last snapshot the caller holds; it only decides [`Reconciliation::changed`].
    pub async fn reconcile(
        &self,
        connection: &Uri,
        own_atom: &Uri,
        store: &MessageStore,
        previous: Option<&AgreementSnapshot>,
    ) -> Result<Reconciliation> {
        let uris = self.source.protocol_uris(connection).await?;
        let mut snapshot = partition(uris);

        let mut fetched: HashMap<Uri, Message> = HashMap::new();
        let mut failures = BTreeMap::new();
        let primary: Vec<Uri> = snapshot.primary_uris().cloned().collect();
        for uri in primary {
            match self.resolve(own_atom, &uri, store, &mut fetched).await {
                Ok(r) => {
                    snapshot.refs.insert(uri, r);
                }
                Err(e) => {
                    warn!(connection = %connection, uri = %uri, error = %e, "could not resolve agreement event");
                    failures.insert(uri, e);
                }
            }
        }

        let pruned = prune_withdrawn(&mut snapshot);
        let changed = previous.map_or(true, |p| p.fingerprint() != snapshot.fingerprint());
        debug!(
            connection = %connection,
            agreements = snapshot.agreement_uris.len(),
            pending = snapshot.pending_proposal_uris.len(),
            cancellation_pending = snapshot.cancellation_pending_agreement_uris.len(),
            failures = failures.len(),
            changed,
            "reconciled agreement data"
        );

        let mut fetched: Vec<Message> = fetched.into_values().collect();
        fetched.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(Reconciliation {
            snapshot,
            fetched,
            failures,
            pruned,
            changed,
        })
    }

    /// Follow the mirror chain starting at `uri`.
    async fn resolve(
        &self,
        own_atom: &Uri,
        uri: &Uri,
        store: &MessageStore,
        fetched: &mut HashMap<Uri, Message>,
    ) -> Result<AgreementRef> {
        let mut head: Option<Uri> = None;
        let mut current = uri.clone();
        let mut visited = HashSet::new();

        for _ in 0..self.max_depth {
            if !visited.insert(current.clone()) {
                return Err(Error::Cycle(uri.clone()));
            }
            let msg = match store.find(&current).or_else(|| fetched.get(&current)) {
                Some(msg) => msg.clone(),
                None => {
                    trace!(uri = %current, "fetching agreement event");
                    let msg = self.source.fetch_message(own_atom, &current).await?;
                    fetched.insert(current.clone(), msg.clone());
                    msg
                }
            };

            let own_copy = msg.is_outgoing() && msg.target_atom().as_ref() == Some(own_atom);
            if let (true, Some(remote)) = (own_copy, &msg.remote_uri) {
                head.get_or_insert_with(|| msg.uri.clone());
                current = remote.clone();
                continue;
            }
            return Ok(AgreementRef {
                head_uri: head.unwrap_or_else(|| msg.uri.clone()),
                state_uri: msg.uri,
            });
        }
        Err(Error::DepthExceeded {
            uri: uri.clone(),
            depth: self.max_depth,
        })
    }
}

/// Steps 1 and 2: turn the endpoint response into disjoint sets.
pub fn partition(uris: AgreementProtocolUris) -> AgreementSnapshot {
    let AgreementProtocolUris {
        agreement_uris,
        pending_proposal_uris,
        accepted_cancellation_proposal_uris,
        cancellation_pending_agreement_uris,
        cancelled_agreement_uris,
        rejected_message_uris,
        retracted_message_uris,
        ..
    } = uris;

    let agreement_uris = agreement_uris
        .difference(&cancellation_pending_agreement_uris)
        .cloned()
        .collect();
    let pending_proposal_uris = pending_proposal_uris
        .into_iter()
        .filter(|u| !cancellation_pending_agreement_uris.contains(u))
        .collect::<std::collections::BTreeSet<_>>();
    let mut snapshot = AgreementSnapshot {
        agreement_uris,
        pending_proposal_uris,
        cancellation_pending_agreement_uris,
        cancelled_agreement_uris,
        accepted_cancellation_proposal_uris,
        rejected_message_uris,
        retracted_message_uris,
        refs: BTreeMap::new(),
    };
    let agreed = snapshot.agreement_uris.clone();
    snapshot.pending_proposal_uris.retain(|u| !agreed.contains(u));
    snapshot
}

/// Drop pending proposals that were rejected or retracted. Returns whether anything was removed.
pub fn prune_withdrawn(snapshot: &mut AgreementSnapshot) -> bool {
    let before = snapshot.pending_proposal_uris.len();
    let withdrawn: Vec<Uri> = snapshot
        .pending_proposal_uris
        .iter()
        .filter(|u| snapshot.rejected_message_uris.contains(*u) || snapshot.retracted_message_uris.contains(*u))
        .cloned()
        .collect();
    for uri in &withdrawn {
        snapshot.pending_proposal_uris.remove(uri);
        snapshot.refs.remove(uri);
    }
    snapshot.pending_proposal_uris.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn set(uris: &[&str]) -> BTreeSet<Uri> {
        uris.iter().map(|u| Uri::from(*u)).collect()
    }

    #[test]
    fn cancellation_pending_excluded_from_agreements() {
        let snapshot = partition(AgreementProtocolUris {
            agreement_uris: set(&["x", "y"]),
            cancellation_pending_agreement_uris: set(&["x"]),
            pending_proposal_uris: set(&["x", "y", "z"]),
            ..Default::default()
        });
        assert_eq!(snapshot.agreement_uris, set(&["y"]));
        assert_eq!(snapshot.cancellation_pending_agreement_uris, set(&["x"]));
        assert_eq!(snapshot.pending_proposal_uris, set(&["z"]));
    }

    #[test]
    fn prune_removes_withdrawn_proposals() {
        let mut snapshot = partition(AgreementProtocolUris {
            pending_proposal_uris: set(&["p1", "p2", "p3"]),
            rejected_message_uris: set(&["p1"]),
            retracted_message_uris: set(&["p3"]),
            ..Default::default()
        });
        assert!(prune_withdrawn(&mut snapshot));
        assert_eq!(snapshot.pending_proposal_uris, set(&["p2"]));
        assert!(!prune_withdrawn(&mut snapshot));
    }
}
