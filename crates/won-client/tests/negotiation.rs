//! Sending and agreement scenarios through the client.

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use common::*;
use won_agreement::AgreementProtocolUris;
use won_client::{Client, ClientConfig, Error, LoadOutcome};
use won_protocol::{
    Action, ConnectionState, Direction, Message, MessageKind, OutboundAction, ReferenceKind, References, Uri,
};

fn conn() -> Uri {
    Uri::from(CONN)
}

fn chat(text: &str) -> OutboundAction {
    OutboundAction::Chat { text: text.into() }
}

async fn client_with(node: MockNode, state: ConnectionState) -> Client<MockNode> {
    let node = MockNode {
        connections: [(conn(), connection(state))].into_iter().collect(),
        ..node
    };
    let client = Client::new(node, ClientConfig::default().with_node_uri("https://node.example/won/resource"));
    assert_eq!(client.load_connection(&conn()).await, LoadOutcome::Loaded);
    client
}

fn outgoing_chat(uri: &str, references: References, date: u64) -> Message {
    Message::chat(uri, Direction::Outgoing, references)
        .with_sockets(own_socket(), other_socket())
        .with_date(date)
}

fn proposes(target: &str) -> MessageKind {
    MessageKind::Chat {
        references: References::default().with(ReferenceKind::Proposes, target),
    }
}

#[tokio::test]
async fn send_preconditions_are_checked_before_transport() {
    let client = client_with(MockNode::default(), ConnectionState::Suggested).await;

    let err = client.send(&conn(), chat("hi")).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(won_protocol::Error::SendNotAllowed { kind: "chat", .. })
    ));
    assert!(client.transport().sent().is_empty());
    assert!(client.state().await.connection(&conn()).unwrap().messages.is_empty());
}

#[tokio::test]
async fn accepting_own_proposal_is_rejected() {
    let client = client_with(MockNode::default(), ConnectionState::Connected).await;
    client.receive(conn(), outgoing_chat("a", References::default(), 1)).await;
    client
        .receive(conn(), outgoing_chat("p", References::default().with(ReferenceKind::Proposes, "a"), 2))
        .await;

    let err = client
        .send(
            &conn(),
            OutboundAction::Negotiate {
                action: Action::Accept,
                referenced: Uri::from("p"),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Protocol(won_protocol::Error::ActionNotAllowed { action: Action::Accept, .. })
    ));
    assert!(client.transport().sent().is_empty());
}

#[tokio::test]
async fn request_received_only_allows_open() {
    let client = Client::new(MockNode::default(), ClientConfig::default());
    client.receive(conn(), incoming("c1", MessageKind::Connect, 1)).await;
    assert_eq!(
        client.state().await.connection(&conn()).unwrap().state(),
        ConnectionState::RequestReceived
    );

    assert!(client.send(&conn(), chat("too early")).await.is_err());
    assert!(client.send(&conn(), OutboundAction::Connect { text: None }).await.is_err());
    assert!(client.send(&conn(), OutboundAction::Open { text: None }).await.is_ok());

    assert_eq!(
        client.state().await.connection(&conn()).unwrap().state(),
        ConnectionState::Connected
    );
    assert!(client.send(&conn(), chat("now")).await.is_ok());
    assert_eq!(client.transport().sent().len(), 2);
}

#[tokio::test]
async fn optimistic_send_is_reconciled_with_receipt() {
    let client = client_with(MockNode::default(), ConnectionState::Connected).await;

    let uri = client.send(&conn(), chat("hello")).await.unwrap();
    let state = client.state().await;
    let stored = state.connection(&conn()).unwrap().messages.get(&uri).unwrap();
    assert!(stored.delivery.is_received_by_own);
    assert!(!stored.delivery.failed_to_send);
    assert_eq!(stored.remote_uri, Some(Uri::new(format!("{uri}-remote"))));
    assert!(uri.as_str().starts_with("https://node.example/won/resource/event/"));
}

#[tokio::test]
async fn failed_send_keeps_flagged_copy() {
    let node = MockNode {
        fail_sends: true,
        ..Default::default()
    };
    let client = client_with(node, ConnectionState::Connected).await;

    let err = client.send(&conn(), chat("lost")).await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)));

    let state = client.state().await;
    let messages = &state.connection(&conn()).unwrap().messages;
    assert_eq!(messages.len(), 1);
    assert!(messages.iter().all(|m| m.delivery.failed_to_send));
}

#[tokio::test]
async fn accept_then_reconcile_is_idempotent() {
    let node = MockNode {
        protocol_uris: Mutex::new(AgreementProtocolUris {
            agreement_uris: BTreeSet::from([Uri::from("p")]),
            ..Default::default()
        }),
        ..Default::default()
    };
    let client = client_with(node, ConnectionState::Connected).await;
    client.receive(conn(), outgoing_chat("a", References::default(), 1)).await;
    client.receive(conn(), incoming("p", proposes("a"), 2)).await;
    assert_eq!(
        client.allowed_actions(&conn(), &Uri::from("p")).await.unwrap(),
        vec![Action::Accept, Action::Reject]
    );

    client
        .send(
            &conn(),
            OutboundAction::Negotiate {
                action: Action::Accept,
                referenced: Uri::from("p"),
            },
        )
        .await
        .unwrap();
    assert!(client.message_status(&conn(), &Uri::from("p")).await.unwrap().is_agreed);
    assert!(client.state().await.connection(&conn()).unwrap().agreement_stale);

    let results = client.reconcile_stale().await;
    assert_eq!(results.len(), 1);
    let first = results.into_iter().next().unwrap().1.unwrap().unwrap();
    assert!(first.changed);
    assert!(first.fetched.is_empty());
    assert!(first.snapshot.agreement_uris.contains(&Uri::from("p")));

    let second = client.reconcile_agreements(&conn()).await.unwrap().unwrap();
    assert!(!second.changed);
    assert_eq!(second.snapshot, first.snapshot);

    let state = client.state().await;
    let connection = state.connection(&conn()).unwrap();
    assert!(!connection.agreement_stale);
    assert_eq!(connection.agreement.as_ref(), Some(&second.snapshot));
}

#[tokio::test]
async fn agreement_retries_stop_after_cap() {
    let node = MockNode {
        fail_protocol: true,
        connections: [(conn(), connection(ConnectionState::Connected))].into_iter().collect(),
        ..Default::default()
    };
    let client = Client::new(node, ClientConfig::default().with_sub_resource_max_failures(2));
    client.load_connection(&conn()).await;

    assert!(matches!(client.reconcile_agreements(&conn()).await, Err(Error::Agreement(_))));
    assert!(matches!(client.reconcile_agreements(&conn()).await, Err(Error::Agreement(_))));
    assert!(client.reconcile_agreements(&conn()).await.unwrap().is_none());
    assert_eq!(client.transport().protocol_queries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn unknown_connection_is_an_error() {
    let client = Client::new(MockNode::default(), ClientConfig::default());
    let err = client.send(&conn(), chat("hi")).await.unwrap_err();
    assert!(matches!(err, Error::UnknownConnection(_)));
}
