//! Async orchestration of loads, sends and agreement reconciliation.

use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info, warn};
use won_agreement::{AgreementAggregator, Reconciliation};
use won_process::{ProcessState, ResourceKind, SubResource};
use won_protocol::{
    ensure_allowed, Action, Classification, Message, MessageBuilder, MessageStatus, OutboundAction, Uri,
};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::state::{ClientState, Connection, Event};
use crate::transport::{FetchError, Transport, TransportSource};

/// Result of a load request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded,
    /// Another caller is fetching the same resource; nothing was done.
    AlreadyLoading,
    /// The resource was deleted on the node and removed locally.
    Gone,
    Failed(FetchError),
}

impl LoadOutcome {
    fn from_error(error: FetchError) -> Self {
        if error.is_gone() {
            Self::Gone
        } else {
            Self::Failed(error)
        }
    }
}

/// Client runtime for one logged-in account.
///
/// The state lock is never held across a transport call.
pub struct Client<T> {
    transport: T,
    config: ClientConfig,
    state: RwLock<ClientState>,
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        let process = ProcessState::new().with_retry_policy(config.retry_policy());
        Self {
            transport,
            config,
            state: RwLock::new(ClientState::new(process)),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Read access to the current state.
    pub async fn state(&self) -> RwLockReadGuard<'_, ClientState> {
        self.state.read().await
    }

    /// Fold an event into the state.
    pub async fn apply(&self, event: Event) {
        self.state.write().await.apply(event);
    }

    /// Handle a message pushed by the node.
    pub async fn receive(&self, connection: Uri, message: Message) {
        self.apply(Event::MessageReceived { connection, message }).await;
    }

    /// Flag an atom for loading.
    pub async fn request_atom(&self, uri: &Uri) -> bool {
        self.state.write().await.process_mut().mark_to_load(ResourceKind::Atom, uri)
    }

    async fn start_load(&self, kind: ResourceKind, uri: &Uri) -> bool {
        let started = self.state.write().await.process_mut().start_load(kind, uri).is_started();
        if !started {
            debug!(kind = %kind, uri = %uri, "load already in flight");
        }
        started
    }

    // === Loading ===

    pub async fn load_atom(&self, uri: &Uri) -> LoadOutcome {
        if !self.start_load(ResourceKind::Atom, uri).await {
            return LoadOutcome::AlreadyLoading;
        }
        match self.transport.fetch_atom(uri).await {
            Ok(data) => {
                self.apply(Event::AtomLoaded(data)).await;
                LoadOutcome::Loaded
            }
            Err(error) => {
                self.apply(Event::AtomLoadFailed {
                    uri: uri.clone(),
                    error: error.clone(),
                })
                .await;
                LoadOutcome::from_error(error)
            }
        }
    }

    pub async fn load_connection_container(&self, atom: &Uri) -> LoadOutcome {
        if !self.start_load(ResourceKind::ConnectionContainer, atom).await {
            return LoadOutcome::AlreadyLoading;
        }
        match self.transport.fetch_connection_container(atom).await {
            Ok(connections) => {
                self.apply(Event::ContainerLoaded {
                    atom: atom.clone(),
                    connections,
                })
                .await;
                LoadOutcome::Loaded
            }
            Err(error) => {
                self.apply(Event::ContainerLoadFailed {
                    atom: atom.clone(),
                    error: error.clone(),
                })
                .await;
                LoadOutcome::from_error(error)
            }
        }
    }

    pub async fn load_connection(&self, uri: &Uri) -> LoadOutcome {
        if !self.start_load(ResourceKind::Connection, uri).await {
            return LoadOutcome::AlreadyLoading;
        }
        match self.transport.fetch_connection(uri).await {
            Ok(data) => {
                self.apply(Event::ConnectionLoaded(data)).await;
                LoadOutcome::Loaded
            }
            Err(error) => {
                self.apply(Event::ConnectionLoadFailed {
                    uri: uri.clone(),
                    error: error.clone(),
                })
                .await;
                LoadOutcome::from_error(error)
            }
        }
    }

    /// Fetch the next page of a connection's messages.
    pub async fn load_messages(&self, connection: &Uri) -> LoadOutcome {
        let page = {
            let mut state = self.state.write().await;
            let process = state.process_mut();
            if !process.start_message_page(connection).is_started() {
                return LoadOutcome::AlreadyLoading;
            }
            process.connection(connection).and_then(|c| c.next_page.clone())
        };
        match self.transport.fetch_messages(connection, page.as_deref()).await {
            Ok(page) => {
                debug!(connection = %connection, count = page.messages.len(), "message page loaded");
                self.apply(Event::MessagesLoaded {
                    connection: connection.clone(),
                    page,
                })
                .await;
                LoadOutcome::Loaded
            }
            Err(error) => {
                self.apply(Event::MessagesLoadFailed {
                    connection: connection.clone(),
                    messages: Vec::new(),
                    next_page: page,
                    error: error.clone(),
                })
                .await;
                LoadOutcome::Failed(error)
            }
        }
    }

    /// Load every atom, container and connection flagged to load.
    ///
    /// # Returns
    ///
    /// The number of resources that loaded.
    pub async fn load_pending(&self) -> usize {
        let (atoms, containers, connections) = {
            let state = self.state.read().await;
            let process = state.process();
            (
                process.to_load(ResourceKind::Atom),
                process.to_load(ResourceKind::ConnectionContainer),
                process.to_load(ResourceKind::Connection),
            )
        };
        let mut loaded = 0;
        for uri in &atoms {
            loaded += usize::from(self.load_atom(uri).await == LoadOutcome::Loaded);
        }
        for uri in &containers {
            loaded += usize::from(self.load_connection_container(uri).await == LoadOutcome::Loaded);
        }
        for uri in &connections {
            loaded += usize::from(self.load_connection(uri).await == LoadOutcome::Loaded);
        }
        info!(loaded, requested = atoms.len() + containers.len() + connections.len(), "pending loads done");
        loaded
    }

    // === Negotiation ===

    fn unknown(connection: &Uri) -> Error {
        Error::UnknownConnection(connection.to_string())
    }

    /// Derived status of a message on a connection.
    pub async fn message_status(&self, connection: &Uri, uri: &Uri) -> Result<MessageStatus> {
        let state = self.state.read().await;
        let conn = state.connection(connection).ok_or_else(|| Self::unknown(connection))?;
        conn.messages
            .graph()
            .status_of(uri)
            .ok_or_else(|| won_protocol::Error::UnknownMessage(uri.clone()).into())
    }

    /// Negotiation actions currently available on a message.
    pub async fn allowed_actions(&self, connection: &Uri, uri: &Uri) -> Result<Vec<Action>> {
        let state = self.state.read().await;
        let conn = state.connection(connection).ok_or_else(|| Self::unknown(connection))?;
        let graph = conn.messages.graph();
        let msg = graph
            .message(uri)
            .ok_or_else(|| won_protocol::Error::UnknownMessage(uri.clone()))?;
        Ok(won_protocol::allowed_actions(msg, &graph.status(msg), conn.state()))
    }

    /// How a message should be displayed.
    pub async fn classify(&self, connection: &Uri, uri: &Uri) -> Result<Classification> {
        let state = self.state.read().await;
        let conn = state.connection(connection).ok_or_else(|| Self::unknown(connection))?;
        let graph = conn.messages.graph();
        let msg = graph
            .message(uri)
            .ok_or_else(|| won_protocol::Error::UnknownMessage(uri.clone()))?;
        Ok(won_protocol::classify(msg, &graph.status(msg)))
    }

    /// Send a message over a connection.
    ///
    /// Preconditions are checked against the current state before anything
    /// is sent. The message is inserted optimistically and annotated with the
    /// outcome of the send.
    ///
    /// # Returns
    ///
    /// The local URI of the sent message.
    pub async fn send(&self, connection: &Uri, action: OutboundAction) -> Result<Uri> {
        let outbound = {
            let state = self.state.read().await;
            let conn = state.connection(connection).ok_or_else(|| Self::unknown(connection))?;
            let builder = MessageBuilder::new(
                self.config.node_uri.clone(),
                conn.socket.clone(),
                conn.target_socket.clone(),
            );
            let outbound = builder.build(&action);
            check_send(conn, &action, &outbound.message)?;
            outbound
        };
        let uri = outbound.event_uri.clone();

        self.apply(Event::MessageSent {
            connection: connection.clone(),
            message: outbound.message.clone(),
        })
        .await;

        match self.transport.send(connection, &outbound).await {
            Ok(receipt) => {
                debug!(connection = %connection, uri = %uri, kind = outbound.message.kind.name(), "message sent");
                self.apply(Event::SendSucceeded {
                    connection: connection.clone(),
                    uri: uri.clone(),
                    remote_uri: receipt.remote_uri,
                })
                .await;
                Ok(uri)
            }
            Err(error) => {
                self.apply(Event::SendFailed {
                    connection: connection.clone(),
                    uri,
                })
                .await;
                Err(error.into())
            }
        }
    }

    // === Agreements ===

    /// Refresh the agreement snapshot of a connection from the owner.
    ///
    /// # Returns
    ///
    /// `None` if a reconciliation is already running or the retry budget of
    /// the connection is spent.
    pub async fn reconcile_agreements(&self, connection: &Uri) -> Result<Option<Reconciliation>> {
        let (store, previous, own_atom) = {
            let mut state = self.state.write().await;
            let conn = state.connection(connection).ok_or_else(|| Self::unknown(connection))?;
            let inputs = (conn.messages.clone(), conn.agreement.clone(), conn.atom.clone());
            let process = state.process_mut();
            if !process.may_retry_sub_resource(connection, SubResource::AgreementData) {
                warn!(connection = %connection, "agreement data failed too often, not retrying");
                return Ok(None);
            }
            if !process.start_sub_resource(connection, SubResource::AgreementData).is_started() {
                return Ok(None);
            }
            inputs
        };

        let source = TransportSource {
            transport: &self.transport,
            config: &self.config,
        };
        let aggregator = AgreementAggregator::new(source).with_max_depth(self.config.agreement_max_depth);
        match aggregator.reconcile(connection, &own_atom, &store, previous.as_ref()).await {
            Ok(result) => {
                self.apply(Event::AgreementReconciled {
                    connection: connection.clone(),
                    snapshot: result.snapshot.clone(),
                    fetched: result.fetched.clone(),
                })
                .await;
                Ok(Some(result))
            }
            Err(e) => {
                self.apply(Event::AgreementFailed {
                    connection: connection.clone(),
                })
                .await;
                Err(e.into())
            }
        }
    }

    /// Reconcile every connection whose agreement data went stale.
    pub async fn reconcile_stale(&self) -> Vec<(Uri, Result<Option<Reconciliation>>)> {
        let stale: Vec<Uri> = {
            let state = self.state.read().await;
            let mut uris: Vec<Uri> = state
                .connections()
                .filter(|c| c.agreement_stale)
                .map(|c| c.uri.clone())
                .collect();
            uris.sort();
            uris
        };
        let mut results = Vec::with_capacity(stale.len());
        for uri in stale {
            let result = self.reconcile_agreements(&uri).await;
            results.push((uri, result));
        }
        results
    }

    /// Drop all state.
    pub async fn logout(&self) {
        self.apply(Event::LoggedOut).await;
    }
}

fn check_send(conn: &Connection, action: &OutboundAction, message: &Message) -> Result<()> {
    conn.machine.ensure_can_send(&message.kind)?;
    if let Some((action, referenced)) = action.action() {
        let graph = conn.messages.graph();
        let target = graph
            .message(referenced)
            .ok_or_else(|| won_protocol::Error::UnknownMessage(referenced.clone()))?;
        ensure_allowed(action, target, &graph.status(target), conn.state())?;
    }
    Ok(())
}
