//! In-memory node used by the client scenarios.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use won_agreement::AgreementProtocolUris;
use won_client::{AtomData, AtomState, ConnectionData, FetchError, MessagePage, Receipt, Transport};
use won_protocol::{ConnectionState, Direction, Message, MessageKind, Outbound, Uri};

pub const OWN: &str = "https://node.example/won/resource/atom/own";
pub const OTHER: &str = "https://node.example/won/resource/atom/other";
pub const CONN: &str = "https://node.example/won/resource/atom/own/c/1";

pub fn own_socket() -> Uri {
    Uri::new(format!("{OWN}#chat"))
}

pub fn other_socket() -> Uri {
    Uri::new(format!("{OTHER}#chat"))
}

pub fn connection(state: ConnectionState) -> ConnectionData {
    ConnectionData {
        uri: Uri::from(CONN),
        state,
        socket: own_socket(),
        target_socket: other_socket(),
    }
}

pub fn atom(uri: &str) -> AtomData {
    AtomData {
        uri: Uri::from(uri),
        state: AtomState::Active,
        sockets: vec![Uri::new(format!("{uri}#chat"))],
        owned: uri == OWN,
    }
}

/// A message from the counterpart.
pub fn incoming(uri: &str, kind: MessageKind, date: u64) -> Message {
    Message::new(uri, kind, Direction::Incoming)
        .with_sockets(other_socket(), own_socket())
        .with_content(true)
        .with_date(date)
}

#[derive(Default)]
pub struct MockNode {
    pub atoms: HashMap<Uri, Result<AtomData, FetchError>>,
    pub containers: HashMap<Uri, Result<Vec<ConnectionData>, FetchError>>,
    pub connections: HashMap<Uri, ConnectionData>,
    pub pages: HashMap<Uri, MessagePage>,
    pub events: HashMap<Uri, Message>,
    pub protocol_uris: Mutex<AgreementProtocolUris>,
    pub fail_sends: bool,
    pub fail_protocol: bool,
    pub sent: Mutex<Vec<Outbound>>,
    pub fetches: AtomicUsize,
    pub protocol_queries: AtomicUsize,
}

impl MockNode {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Outbound> {
        self.sent.lock().unwrap().clone()
    }

    async fn fetched(&self) {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // let concurrent callers run while this fetch is in flight
        tokio::task::yield_now().await;
    }
}

fn not_found() -> FetchError {
    FetchError::new(Some(404), "Not Found")
}

#[async_trait]
impl Transport for MockNode {
    async fn send(&self, _connection: &Uri, outbound: &Outbound) -> Result<Receipt, FetchError> {
        tokio::task::yield_now().await;
        if self.fail_sends {
            return Err(FetchError::new(None, "connection reset"));
        }
        self.sent.lock().unwrap().push(outbound.clone());
        Ok(Receipt {
            remote_uri: Some(Uri::new(format!("{}-remote", outbound.event_uri))),
        })
    }

    async fn fetch_atom(&self, uri: &Uri) -> Result<AtomData, FetchError> {
        self.fetched().await;
        self.atoms.get(uri).cloned().unwrap_or_else(|| Err(not_found()))
    }

    async fn fetch_connection_container(&self, atom: &Uri) -> Result<Vec<ConnectionData>, FetchError> {
        self.fetched().await;
        self.containers.get(atom).cloned().unwrap_or_else(|| Err(not_found()))
    }

    async fn fetch_connection(&self, uri: &Uri) -> Result<ConnectionData, FetchError> {
        self.fetched().await;
        self.connections.get(uri).cloned().ok_or_else(not_found)
    }

    async fn fetch_messages(&self, connection: &Uri, _page: Option<&str>) -> Result<MessagePage, FetchError> {
        self.fetched().await;
        self.pages.get(connection).cloned().ok_or_else(not_found)
    }

    async fn fetch_message(&self, _requester_atom: &Uri, uri: &Uri) -> Result<Message, FetchError> {
        self.fetched().await;
        self.events.get(uri).cloned().ok_or_else(not_found)
    }

    async fn fetch_agreement_protocol_uris(&self, _url: &str) -> Result<AgreementProtocolUris, FetchError> {
        self.protocol_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_protocol {
            return Err(FetchError::new(Some(500), "Internal Server Error"));
        }
        Ok(self.protocol_uris.lock().unwrap().clone())
    }
}
