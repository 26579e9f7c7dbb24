//! Offline evaluation of a recorded connection.
//!
//! Feeds a JSON dump of wire messages through the store and derives, per
//! message, its status, classification and available actions. When the
//! owner's agreement-protocol answer is supplied as well, the reconciled
//! snapshot is included.

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use won_agreement::{
    local_snapshot, AgreementAggregator, AgreementProtocolUris, AgreementSnapshot, AgreementSource,
};
use won_protocol::{
    allowed_actions, classify, parse_messages, Action, Classification, ConnectionState,
    ConnectionStateMachine, Direction, Message, MessageStatus, MessageStore, Uri,
};

use crate::error::Result;

/// Per-message line of a [`ReplayReport`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayEntry {
    pub uri: Uri,
    pub kind: &'static str,
    pub direction: Direction,
    pub status: MessageStatus,
    pub classification: Classification,
    pub allowed_actions: Vec<Action>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub connection: Uri,
    pub state: ConnectionState,
    pub messages: Vec<ReplayEntry>,
    /// Agreements derived from the local messages alone.
    pub local: AgreementSnapshot,
    /// Reconciled owner view, if protocol URIs were given.
    pub reconciled: Option<AgreementSnapshot>,
    /// Events the reconciliation could not resolve.
    pub unresolved: Vec<Uri>,
}

/// Answers agreement queries from a recorded response. Events outside the
/// recording are reported missing.
struct RecordedSource {
    uris: AgreementProtocolUris,
}

#[async_trait]
impl AgreementSource for RecordedSource {
    async fn protocol_uris(&self, _connection: &Uri) -> won_agreement::Result<AgreementProtocolUris> {
        Ok(self.uris.clone())
    }

    async fn fetch_message(&self, _requester_atom: &Uri, uri: &Uri) -> won_agreement::Result<Message> {
        Err(won_agreement::Error::Fetch {
            uri: uri.clone(),
            status: Some(404),
            message: "not in recording".into(),
        })
    }
}

/// Evaluate a recorded connection.
///
/// The own atom is taken from the first outgoing message's sender socket.
pub async fn replay(connection: Uri, messages_json: &str, protocol_json: Option<&str>) -> Result<ReplayReport> {
    let store: MessageStore = parse_messages(messages_json)?.into_iter().collect();
    let machine = ConnectionStateMachine::replay(store.sorted());
    let state = machine.state();
    debug!(connection = %connection, messages = store.len(), state = %state, "replayed connection");

    let graph = store.graph();
    let messages = store
        .sorted()
        .into_iter()
        .map(|msg| {
            let status = graph.status(msg);
            ReplayEntry {
                uri: msg.uri.clone(),
                kind: msg.kind.name(),
                direction: msg.direction,
                status,
                classification: classify(msg, &status),
                allowed_actions: allowed_actions(msg, &status, state),
            }
        })
        .collect();
    let local = local_snapshot(&graph);

    let (reconciled, unresolved) = match protocol_json {
        Some(json) => {
            let uris = AgreementProtocolUris::from_json(json)?;
            let own_atom = store
                .sorted()
                .into_iter()
                .find(|m| m.is_outgoing())
                .and_then(Message::sender_atom)
                .unwrap_or_else(|| connection.clone());
            let aggregator = AgreementAggregator::new(RecordedSource { uris });
            let result = aggregator.reconcile(&connection, &own_atom, &store, None).await?;
            (Some(result.snapshot), result.failures.into_keys().collect())
        }
        None => (None, Vec::new()),
    };

    Ok(ReplayReport {
        connection,
        state,
        messages,
        local,
        reconciled,
        unresolved,
    })
}

/// [`replay`] over files on disk.
pub async fn replay_files(connection: Uri, messages: &Path, protocol: Option<&Path>) -> Result<ReplayReport> {
    let messages_json = tokio::fs::read_to_string(messages).await?;
    let protocol_json = match protocol {
        Some(path) => Some(tokio::fs::read_to_string(path).await?),
        None => None,
    };
    replay(connection, &messages_json, protocol_json.as_deref()).await
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESSAGES: &str = r#"[
        { "uri": "c1", "messageType": "msg:ConnectMessage", "outgoingMessage": true, "date": 1,
          "senderSocketUri": "https://node/atom/own#chat", "targetSocketUri": "https://node/atom/other#chat" },
        { "uri": "o1", "messageType": "msg:OpenMessage", "date": 2 },
        { "uri": "a", "messageType": "msg:ConnectionMessage", "outgoingMessage": true, "hasContent": true, "date": 3 },
        { "uri": "p", "messageType": "msg:ConnectionMessage", "hasContent": true, "date": 4,
          "references": { "proposes": ["a"] } }
    ]"#;

    #[tokio::test]
    async fn replay_derives_state_and_actions() {
        let report = replay(Uri::from("conn"), MESSAGES, None).await.unwrap();
        assert_eq!(report.state, ConnectionState::Connected);
        assert_eq!(report.messages.len(), 4);

        let p = report.messages.iter().find(|e| e.uri == Uri::from("p")).unwrap();
        assert_eq!(p.classification, Classification::Proposal);
        assert!(p.allowed_actions.contains(&Action::Accept));
        assert!(report.reconciled.is_none());
    }

    #[tokio::test]
    async fn replay_reconciles_recorded_protocol_uris() {
        let protocol = r#"{ "pendingProposalUris": ["p"], "agreementUris": ["missing"] }"#;
        let report = replay(Uri::from("conn"), MESSAGES, Some(protocol)).await.unwrap();
        let reconciled = report.reconciled.unwrap();
        assert!(reconciled.pending_proposal_uris.contains(&Uri::from("p")));
        assert_eq!(report.unresolved, vec![Uri::from("missing")]);
    }
}
