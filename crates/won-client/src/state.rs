//! Application state and its reducer.
//!
//! [`ClientState`] holds everything the client knows: atoms, connections
//! with their message logs, and the load bookkeeping. It only changes through
//! [`ClientState::apply`], one [`Event`] at a time.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use won_agreement::AgreementSnapshot;
use won_process::{FailureOutcome, ProcessState, ResourceKind, SubResource};
use won_protocol::{
    Admission, ConnectionState, ConnectionStateMachine, Direction, Message, MessageStore, Uri,
};

use crate::transport::{AtomData, ConnectionData, FetchError, MessagePage};

/// Activation state of an atom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AtomState {
    Active,
    Inactive,
    Deleted,
}

impl std::fmt::Display for AtomState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Inactive => write!(f, "Inactive"),
            Self::Deleted => write!(f, "Deleted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    pub uri: Uri,
    pub state: AtomState,
    pub sockets: BTreeSet<Uri>,
    /// Local fact, never transmitted.
    pub owned: bool,
}

/// A connection between one of our sockets and a target socket.
#[derive(Debug, Clone)]
pub struct Connection {
    pub uri: Uri,
    /// Our atom.
    pub atom: Uri,
    pub socket: Uri,
    pub target_socket: Uri,
    pub machine: ConnectionStateMachine,
    pub messages: MessageStore,
    pub agreement: Option<AgreementSnapshot>,
    /// A message arrived that may change agreement data.
    pub agreement_stale: bool,
}

impl Connection {
    fn new(uri: Uri, atom: Uri, socket: Uri, target_socket: Uri, machine: ConnectionStateMachine) -> Self {
        Self {
            uri,
            atom,
            socket,
            target_socket,
            machine,
            messages: MessageStore::new(),
            agreement: None,
            agreement_stale: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.machine.state()
    }

    pub fn target_atom(&self) -> Option<Uri> {
        self.target_socket.socket_atom()
    }

    pub fn is_unread(&self) -> bool {
        self.messages.has_unread()
    }
}

/// Something that happened, to be folded into the state.
#[derive(Debug, Clone)]
pub enum Event {
    AtomLoaded(AtomData),
    AtomLoadFailed { uri: Uri, error: FetchError },
    AtomDeactivated(Uri),
    AtomActivated(Uri),
    AtomDeleted(Uri),
    ContainerLoaded { atom: Uri, connections: Vec<ConnectionData> },
    ContainerLoadFailed { atom: Uri, error: FetchError },
    ConnectionLoaded(ConnectionData),
    ConnectionLoadFailed { uri: Uri, error: FetchError },
    MessagesLoaded { connection: Uri, page: MessagePage },
    MessagesLoadFailed { connection: Uri, messages: Vec<Uri>, next_page: Option<String>, error: FetchError },
    /// A message pushed by the node or found while loading.
    MessageReceived { connection: Uri, message: Message },
    /// Optimistic local copy of a message handed to the transport.
    MessageSent { connection: Uri, message: Message },
    SendSucceeded { connection: Uri, uri: Uri, remote_uri: Option<Uri> },
    SendFailed { connection: Uri, uri: Uri },
    AgreementReconciled { connection: Uri, snapshot: AgreementSnapshot, fetched: Vec<Message> },
    AgreementFailed { connection: Uri },
    LoggedOut,
}

/// Everything the client knows.
#[derive(Debug, Default)]
pub struct ClientState {
    atoms: HashMap<Uri, Atom>,
    connections: HashMap<Uri, Connection>,
    process: ProcessState,
    version: u64,
}

impl ClientState {
    pub fn new(process: ProcessState) -> Self {
        Self {
            process,
            ..Default::default()
        }
    }

    pub fn atom(&self, uri: &Uri) -> Option<&Atom> {
        self.atoms.get(uri)
    }

    pub fn atoms(&self) -> impl Iterator<Item = &Atom> {
        self.atoms.values()
    }

    pub fn connection(&self, uri: &Uri) -> Option<&Connection> {
        self.connections.get(uri)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Connections owned by `atom`, ordered by URI.
    pub fn connections_of(&self, atom: &Uri) -> Vec<&Connection> {
        let mut conns: Vec<&Connection> = self.connections.values().filter(|c| &c.atom == atom).collect();
        conns.sort_by(|a, b| a.uri.cmp(&b.uri));
        conns
    }

    pub fn process(&self) -> &ProcessState {
        &self.process
    }

    pub fn process_mut(&mut self) -> &mut ProcessState {
        &mut self.process
    }

    /// Change counter.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Fold an event into the state.
    pub fn apply(&mut self, event: Event) {
        self.version += 1;
        match event {
            Event::AtomLoaded(data) => self.atom_loaded(data),
            Event::AtomLoadFailed { uri, error } => {
                self.load_failed(ResourceKind::Atom, &uri, &error);
            }
            Event::AtomDeactivated(uri) => self.set_atom_state(&uri, AtomState::Inactive),
            Event::AtomActivated(uri) => self.set_atom_state(&uri, AtomState::Active),
            Event::AtomDeleted(uri) => {
                self.process.remove_atom(&uri);
                self.remove_atom(&uri);
            }
            Event::ContainerLoaded { atom, connections } => self.container_loaded(&atom, connections),
            Event::ContainerLoadFailed { atom, error } => {
                self.load_failed(ResourceKind::ConnectionContainer, &atom, &error);
            }
            Event::ConnectionLoaded(data) => {
                if self.process.mark_loaded(ResourceKind::Connection, &data.uri, None) {
                    if let Some(atom) = data.atom() {
                        self.process.set_connection_atom(&data.uri, &atom);
                    }
                    self.upsert_connection(data);
                }
            }
            Event::ConnectionLoadFailed { uri, error } => {
                self.load_failed(ResourceKind::Connection, &uri, &error);
            }
            Event::MessagesLoaded { connection, page } => {
                let uris: Vec<Uri> = page.messages.iter().map(|m| m.uri.clone()).collect();
                let mut ordered = page.messages;
                ordered.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.uri.cmp(&b.uri)));
                for message in ordered {
                    self.message_received(&connection, message);
                }
                self.process.message_page_loaded(&connection, &uris, page.next_page);
            }
            Event::MessagesLoadFailed { connection, messages, next_page, error } => {
                self.process
                    .message_page_failed(&connection, &messages, next_page, error.to_status_info());
            }
            Event::MessageReceived { connection, message } => self.message_received(&connection, message),
            Event::MessageSent { connection, message } => {
                if let Some(conn) = self.connections.get_mut(&connection) {
                    trace!(connection = %connection, uri = %message.uri, "optimistic insert");
                    conn.messages.insert(message);
                }
            }
            Event::SendSucceeded { connection, uri, remote_uri } => self.send_succeeded(&connection, &uri, remote_uri),
            Event::SendFailed { connection, uri } => {
                if let Some(conn) = self.connections.get_mut(&connection) {
                    warn!(connection = %connection, uri = %uri, "failed to send");
                    conn.messages.mark_failed_to_send(&uri);
                }
            }
            Event::AgreementReconciled { connection, snapshot, fetched } => {
                if let Some(conn) = self.connections.get_mut(&connection) {
                    conn.messages.extend(fetched);
                    conn.agreement = Some(snapshot);
                    conn.agreement_stale = false;
                }
                self.process.sub_resource_loaded(&connection, SubResource::AgreementData);
            }
            Event::AgreementFailed { connection } => {
                self.process.sub_resource_failed(&connection, SubResource::AgreementData);
            }
            Event::LoggedOut => {
                debug!("logged out, dropping state");
                self.atoms.clear();
                self.connections.clear();
                self.process.reset();
            }
        }
    }

    fn atom_loaded(&mut self, data: AtomData) {
        if !self.process.mark_loaded(ResourceKind::Atom, &data.uri, None) {
            return;
        }
        if data.state == AtomState::Deleted {
            self.process.remove_atom(&data.uri);
            self.remove_atom(&data.uri);
            return;
        }
        let owned = data.owned;
        let atom = self.atoms.entry(data.uri.clone()).or_insert_with(|| Atom {
            uri: data.uri.clone(),
            state: data.state,
            sockets: BTreeSet::new(),
            owned,
        });
        atom.state = data.state;
        atom.owned |= owned;
        atom.sockets.extend(data.sockets);
    }

    fn set_atom_state(&mut self, uri: &Uri, state: AtomState) {
        if let Some(atom) = self.atoms.get_mut(uri) {
            debug!(uri = %uri, state = %state, "atom state changed");
            atom.state = state;
        }
    }

    fn remove_atom(&mut self, uri: &Uri) {
        self.atoms.remove(uri);
        self.connections.retain(|_, c| &c.atom != uri);
    }

    fn load_failed(&mut self, kind: ResourceKind, uri: &Uri, error: &FetchError) {
        if let FailureOutcome::Gone(removed) = self.process.mark_failed(kind, uri, error.to_status_info()) {
            // the tracker may not have known every dropped resource
            self.drop_resource(kind, uri);
            for (kind, uri) in removed {
                self.drop_resource(kind, &uri);
            }
        }
    }

    fn drop_resource(&mut self, kind: ResourceKind, uri: &Uri) {
        match kind {
            ResourceKind::Atom | ResourceKind::ConnectionContainer => self.remove_atom(uri),
            ResourceKind::Connection => {
                self.connections.remove(uri);
            }
            ResourceKind::ExternalData => {}
        }
    }

    fn container_loaded(&mut self, atom: &Uri, connections: Vec<ConnectionData>) {
        let listing: Vec<(Uri, Option<Uri>)> = connections.iter().map(|c| (c.uri.clone(), c.target_atom())).collect();
        if !self.process.container_loaded(atom, &listing) {
            return;
        }
        for data in connections {
            let uri = data.uri.clone();
            self.upsert_connection(data);
            self.process.set_connection_atom(&uri, atom);
        }
    }

    fn upsert_connection(&mut self, data: ConnectionData) {
        let Some(atom) = data.atom() else {
            warn!(uri = %data.uri, socket = %data.socket, "connection socket names no atom");
            return;
        };
        match self.connections.get_mut(&data.uri) {
            Some(conn) => {
                if conn.state() != data.state {
                    debug!(uri = %data.uri, from = %conn.state(), to = %data.state, "connection state from node");
                    conn.machine = ConnectionStateMachine::with_state(data.state);
                }
            }
            None => {
                let machine = ConnectionStateMachine::with_state(data.state);
                let conn = Connection::new(data.uri.clone(), atom, data.socket, data.target_socket, machine);
                self.connections.insert(data.uri, conn);
            }
        }
    }

    fn message_received(&mut self, connection: &Uri, message: Message) {
        if !self.connections.contains_key(connection) && !self.create_connection_from(connection, &message) {
            warn!(connection = %connection, uri = %message.uri, "message for unknown connection dropped");
            return;
        }
        if message.direction == Direction::Incoming {
            self.process.add_message_atoms_to_load(&message);
        }
        let needs_effects = message.needs_effects_fetch();
        let Some(conn) = self.connections.get_mut(connection) else {
            return;
        };
        let observed = message.clone();
        if conn.messages.insert(message) != Admission::Added {
            return;
        }
        if let Err(e) = conn.machine.observe(&observed) {
            warn!(connection = %connection, uri = %observed.uri, error = %e, "ignoring illegal lifecycle message");
        }
        if needs_effects {
            conn.agreement_stale = true;
            self.process.mark_petri_net_dirty(connection);
        }
    }

    fn create_connection_from(&mut self, connection: &Uri, message: &Message) -> bool {
        let (own, target) = match message.direction {
            Direction::Outgoing => (&message.sender_socket, &message.target_socket),
            Direction::Incoming => (&message.target_socket, &message.sender_socket),
        };
        let (Some(own), Some(target)) = (own.clone(), target.clone()) else {
            return false;
        };
        let Some(atom) = own.socket_atom() else {
            return false;
        };
        debug!(connection = %connection, atom = %atom, "connection created by message");
        let conn = Connection::new(connection.clone(), atom.clone(), own, target, ConnectionStateMachine::new());
        self.connections.insert(connection.clone(), conn);
        self.process.set_connection_atom(connection, &atom);
        true
    }

    fn send_succeeded(&mut self, connection: &Uri, uri: &Uri, remote_uri: Option<Uri>) {
        let Some(conn) = self.connections.get_mut(connection) else {
            return;
        };
        if !conn.messages.mark_received_by_own(uri, remote_uri) {
            return;
        }
        let Some(msg) = conn.messages.get(uri).cloned() else {
            return;
        };
        if let Err(e) = conn.machine.observe(&msg) {
            warn!(connection = %connection, uri = %uri, error = %e, "sent lifecycle message rejected");
        }
        if msg.needs_effects_fetch() {
            conn.agreement_stale = true;
            self.process.mark_petri_net_dirty(connection);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use won_protocol::{MessageKind, ReferenceKind, References};

    const OWN: &str = "https://node/atom/own";
    const OTHER: &str = "https://node/atom/other";
    const CONN: &str = "https://node/atom/own/c/1";

    fn conn_data(state: ConnectionState) -> ConnectionData {
        ConnectionData {
            uri: Uri::from(CONN),
            state,
            socket: Uri::new(format!("{OWN}#chat")),
            target_socket: Uri::new(format!("{OTHER}#chat")),
        }
    }

    fn with_connection(state: ConnectionState) -> ClientState {
        let mut client = ClientState::default();
        client.process_mut().start_load(ResourceKind::Connection, &Uri::from(CONN));
        client.apply(Event::ConnectionLoaded(conn_data(state)));
        client
    }

    fn incoming(uri: &str, kind: MessageKind) -> Message {
        let mut msg = Message::new(uri, kind, Direction::Incoming)
            .with_sockets(format!("{OTHER}#chat"), format!("{OWN}#chat"));
        msg.has_content = true;
        msg
    }

    #[test]
    fn incoming_connect_creates_request_received_connection() {
        let mut state = ClientState::default();
        state.apply(Event::MessageReceived {
            connection: Uri::from(CONN),
            message: incoming("m1", MessageKind::Connect),
        });
        let conn = state.connection(&Uri::from(CONN)).unwrap();
        assert_eq!(conn.state(), ConnectionState::RequestReceived);
        assert_eq!(conn.atom, Uri::from(OWN));
        assert_eq!(state.process().to_load(ResourceKind::Atom), vec![Uri::from(OTHER), Uri::from(OWN)]);
    }

    #[test]
    fn illegal_inbound_transition_leaves_state() {
        let mut state = ClientState::default();
        state.process_mut().start_load(ResourceKind::ConnectionContainer, &Uri::from(OWN));
        state.apply(Event::ContainerLoaded {
            atom: Uri::from(OWN),
            connections: vec![conn_data(ConnectionState::RequestReceived)],
        });
        state.apply(Event::MessageReceived {
            connection: Uri::from(CONN),
            message: incoming("o1", MessageKind::Open),
        });
        let conn = state.connection(&Uri::from(CONN)).unwrap();
        assert_eq!(conn.state(), ConnectionState::RequestReceived);
        assert_eq!(conn.messages.len(), 1);
    }

    #[test]
    fn referencing_message_marks_agreement_stale() {
        let mut state = with_connection(ConnectionState::Connected);
        let msg = incoming(
            "p1",
            MessageKind::Chat {
                references: References::default().with(ReferenceKind::Proposes, "a"),
            },
        );
        state.apply(Event::MessageReceived {
            connection: Uri::from(CONN),
            message: msg,
        });
        assert!(state.connection(&Uri::from(CONN)).unwrap().agreement_stale);
    }

    #[test]
    fn gone_container_drops_atom_and_connections() {
        let mut state = ClientState::default();
        let own = Uri::from(OWN);
        state.process_mut().start_load(ResourceKind::Atom, &own);
        state.apply(Event::AtomLoaded(AtomData {
            uri: own.clone(),
            state: AtomState::Active,
            sockets: vec![Uri::new(format!("{OWN}#chat"))],
            owned: true,
        }));
        state.apply(Event::MessageReceived {
            connection: Uri::from(CONN),
            message: incoming("m1", MessageKind::Connect),
        });
        state.process_mut().start_load(ResourceKind::ConnectionContainer, &own);
        state.apply(Event::ContainerLoadFailed {
            atom: own.clone(),
            error: FetchError::gone(),
        });

        assert!(state.atom(&own).is_none());
        assert!(state.connection(&Uri::from(CONN)).is_none());
        assert!(!state.process().is_known(ResourceKind::Atom, &own));
        assert!(!state.process().is_known(ResourceKind::ConnectionContainer, &own));
    }

    #[test]
    fn deleted_atom_cascades() {
        let mut state = with_connection(ConnectionState::Connected);
        state.apply(Event::AtomDeleted(Uri::from(OWN)));
        assert!(state.connections_of(&Uri::from(OWN)).is_empty());
    }

    #[test]
    fn failed_send_is_flagged() {
        let mut state = with_connection(ConnectionState::Connected);
        let msg = Message::chat("s1", Direction::Outgoing, References::default());
        state.apply(Event::MessageSent {
            connection: Uri::from(CONN),
            message: msg,
        });
        state.apply(Event::SendFailed {
            connection: Uri::from(CONN),
            uri: Uri::from("s1"),
        });
        let stored = state.connection(&Uri::from(CONN)).unwrap().messages.get(&Uri::from("s1")).cloned().unwrap();
        assert!(stored.delivery.failed_to_send);
    }

    #[test]
    fn logout_clears_everything() {
        let mut state = with_connection(ConnectionState::Connected);
        state.apply(Event::LoggedOut);
        assert!(state.connection(&Uri::from(CONN)).is_none());
    }
}
