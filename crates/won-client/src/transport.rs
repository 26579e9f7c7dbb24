//! Network collaborator seam.
//!
//! The client never talks to the network itself. A [`Transport`] performs
//! fetches and sends and hands back already-parsed records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use won_agreement::{AgreementProtocolUris, AgreementSource};
use won_process::{StatusInfo, GONE};
use won_protocol::{ConnectionState, Message, Outbound, Uri};

use crate::config::ClientConfig;
use crate::state::AtomState;

/// A failed fetch or send.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} (status {status:?})")]
pub struct FetchError {
    /// HTTP status, if the node answered at all.
    pub status: Option<u16>,
    pub message: String,
}

impl FetchError {
    pub fn new(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn gone() -> Self {
        Self::new(Some(GONE), "Gone")
    }

    /// The resource was deleted on the node.
    pub fn is_gone(&self) -> bool {
        self.status == Some(GONE)
    }

    pub fn to_status_info(&self) -> StatusInfo {
        StatusInfo::new(self.status, self.message.clone())
    }
}

/// Node acknowledgement of a sent message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    /// URI the counterpart's node minted for the same event.
    pub remote_uri: Option<Uri>,
}

/// An atom as delivered by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomData {
    pub uri: Uri,
    pub state: AtomState,
    #[serde(default)]
    pub sockets: Vec<Uri>,
    /// Whether the atom belongs to the logged-in account.
    #[serde(default)]
    pub owned: bool,
}

/// A connection as listed in a connection container or fetched on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionData {
    pub uri: Uri,
    pub state: ConnectionState,
    pub socket: Uri,
    pub target_socket: Uri,
}

impl ConnectionData {
    pub fn atom(&self) -> Option<Uri> {
        self.socket.socket_atom()
    }

    pub fn target_atom(&self) -> Option<Uri> {
        self.target_socket.socket_atom()
    }
}

/// One page of a connection's messages, newest first on the node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessagePage {
    pub messages: Vec<Message>,
    /// Cursor for older messages, if any.
    pub next_page: Option<String>,
}

/// Fetches and sends on behalf of the client.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, connection: &Uri, outbound: &Outbound) -> Result<Receipt, FetchError>;

    async fn fetch_atom(&self, uri: &Uri) -> Result<AtomData, FetchError>;

    /// Connections of an atom.
    async fn fetch_connection_container(&self, atom: &Uri) -> Result<Vec<ConnectionData>, FetchError>;

    async fn fetch_connection(&self, uri: &Uri) -> Result<ConnectionData, FetchError>;

    async fn fetch_messages(&self, connection: &Uri, page: Option<&str>) -> Result<MessagePage, FetchError>;

    /// A single event as seen by `requester_atom`.
    async fn fetch_message(&self, requester_atom: &Uri, uri: &Uri) -> Result<Message, FetchError>;

    /// GET on the owner's agreement-protocol endpoint.
    async fn fetch_agreement_protocol_uris(&self, url: &str) -> Result<AgreementProtocolUris, FetchError>;
}

/// Serves agreement queries through a [`Transport`].
pub(crate) struct TransportSource<'a, T> {
    pub transport: &'a T,
    pub config: &'a ClientConfig,
}

fn to_agreement_error(uri: &Uri, e: FetchError) -> won_agreement::Error {
    won_agreement::Error::Fetch {
        uri: uri.clone(),
        status: e.status,
        message: e.message,
    }
}

#[async_trait]
impl<'a, T: Transport> AgreementSource for TransportSource<'a, T> {
    async fn protocol_uris(&self, connection: &Uri) -> won_agreement::Result<AgreementProtocolUris> {
        let url = self.config.agreement_protocol_url(connection);
        self.transport
            .fetch_agreement_protocol_uris(&url)
            .await
            .map_err(|e| to_agreement_error(connection, e))
    }

    async fn fetch_message(&self, requester_atom: &Uri, uri: &Uri) -> won_agreement::Result<Message> {
        self.transport
            .fetch_message(requester_atom, uri)
            .await
            .map_err(|e| to_agreement_error(uri, e))
    }
}
