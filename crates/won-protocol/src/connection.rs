//! Connection lifecycle.
//!
//! A connection moves between five states, driven by connect, open and close
//! messages travelling in either direction:
//!
//! ```text
//!              local connect                remote open
//!  Suggested ───────────────► RequestSent ──────────────┐
//!      │                          │ remote connect        ▼
//!      │ remote connect           └───────────────────► Connected
//!      ▼                                                  ▲
//!  RequestReceived ──────────── local open ───────────────┘
//!
//!  any state but Closed ── close ──► Closed ── connect ──► RequestSent / RequestReceived
//! ```
//!
//! A connect seen from both directions counts as connected. Illegal events
//! are rejected and leave the state untouched.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::message::{Direction, Message, MessageKind};

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Proposed by a matcher; nobody has asked yet.
    Suggested,
    /// We sent a connect and are waiting for the counterpart.
    RequestSent,
    /// The counterpart sent a connect and is waiting for us.
    RequestReceived,
    Connected,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Suggested => write!(f, "Suggested"),
            Self::RequestSent => write!(f, "RequestSent"),
            Self::RequestReceived => write!(f, "RequestReceived"),
            Self::Connected => write!(f, "Connected"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// A lifecycle event, qualified by which side produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionEvent {
    LocalConnect,
    RemoteConnect,
    LocalOpen,
    RemoteOpen,
    LocalClose,
    RemoteClose,
}

impl ConnectionEvent {
    /// The lifecycle event a message represents, if any.
    pub fn from_message(msg: &Message) -> Option<Self> {
        let outgoing = msg.direction == Direction::Outgoing;
        let event = match (&msg.kind, outgoing) {
            (MessageKind::Connect, true) => Self::LocalConnect,
            (MessageKind::Connect, false) => Self::RemoteConnect,
            (MessageKind::Open, true) => Self::LocalOpen,
            (MessageKind::Open, false) => Self::RemoteOpen,
            (MessageKind::Close, true) => Self::LocalClose,
            (MessageKind::Close, false) => Self::RemoteClose,
            _ => return None,
        };
        Some(event)
    }
}

impl std::fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LocalConnect => write!(f, "local connect"),
            Self::RemoteConnect => write!(f, "remote connect"),
            Self::LocalOpen => write!(f, "local open"),
            Self::RemoteOpen => write!(f, "remote open"),
            Self::LocalClose => write!(f, "local close"),
            Self::RemoteClose => write!(f, "remote close"),
        }
    }
}

/// The successor of `state` under `event`, or `None` if the event is illegal.
pub fn transition(state: ConnectionState, event: ConnectionEvent) -> Option<ConnectionState> {
    use ConnectionEvent::*;
    use ConnectionState::*;

    match (state, event) {
        (Suggested, LocalConnect) | (Closed, LocalConnect) => Some(RequestSent),
        (Suggested, RemoteConnect) | (Closed, RemoteConnect) => Some(RequestReceived),
        (RequestSent, RemoteConnect) | (RequestSent, RemoteOpen) => Some(Connected),
        (RequestReceived, LocalOpen) => Some(Connected),
        (Closed, LocalClose) | (Closed, RemoteClose) => None,
        (_, LocalClose) | (_, RemoteClose) => Some(Closed),
        _ => None,
    }
}

/// Whether a message of `kind` may be sent while the connection is in `state`.
pub fn can_send(state: ConnectionState, kind: &MessageKind) -> bool {
    use ConnectionState::*;

    match kind {
        MessageKind::Connect => matches!(state, Suggested | Closed),
        MessageKind::Open => state == RequestReceived,
        MessageKind::Close => state != Closed,
        MessageKind::Chat { .. } | MessageKind::Feedback => state == Connected,
        MessageKind::AtomHint
        | MessageKind::SocketHint
        | MessageKind::ChangeNotification
        | MessageKind::Response { .. } => false,
    }
}

/// Lifecycle state of one connection plus the rules for changing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    transitions: u64,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    /// A connection suggested by a matcher.
    #[must_use]
    pub fn new() -> Self {
        Self::with_state(ConnectionState::Suggested)
    }

    /// Resume a connection whose state is already known.
    #[must_use]
    pub fn with_state(state: ConnectionState) -> Self {
        Self {
            state,
            transitions: 0,
        }
    }

    /// A connection created by its first connect message.
    #[must_use]
    pub fn from_first_connect(direction: Direction) -> Self {
        match direction {
            Direction::Outgoing => Self::with_state(ConnectionState::RequestSent),
            Direction::Incoming => Self::with_state(ConnectionState::RequestReceived),
        }
    }

    /// Derive the state by replaying lifecycle messages in order. Events that
    /// are illegal at their point in the history are skipped.
    pub fn replay<'a>(messages: impl IntoIterator<Item = &'a Message>) -> Self {
        let mut machine = Self::new();
        for msg in messages {
            if let Err(e) = machine.observe(msg) {
                warn!(uri = %msg.uri, error = %e, "skipping lifecycle message");
            }
        }
        machine
    }

    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Number of successful transitions since creation.
    #[must_use]
    pub const fn transitions(&self) -> u64 {
        self.transitions
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Apply an event.
    ///
    /// # Returns
    ///
    /// - `Ok(state)` - the new state
    /// - `Err(Error::InvalidTransition)` - the event is illegal; state unchanged
    pub fn apply(&mut self, event: ConnectionEvent) -> Result<ConnectionState> {
        match transition(self.state, event) {
            Some(next) => {
                debug!(from = %self.state, to = %next, event = %event, "connection transition");
                self.state = next;
                self.transitions += 1;
                Ok(next)
            }
            None => Err(Error::InvalidTransition {
                state: self.state,
                event,
            }),
        }
    }

    /// Apply the lifecycle event carried by `msg`, if it carries one.
    pub fn observe(&mut self, msg: &Message) -> Result<Option<ConnectionState>> {
        match ConnectionEvent::from_message(msg) {
            Some(event) => self.apply(event).map(Some),
            None => Ok(None),
        }
    }

    /// Whether a message of `kind` may be sent now.
    #[must_use]
    pub fn can_send(&self, kind: &MessageKind) -> bool {
        can_send(self.state, kind)
    }

    /// Fail with [`Error::SendNotAllowed`] unless `kind` may be sent now.
    pub fn ensure_can_send(&self, kind: &MessageKind) -> Result<()> {
        if self.can_send(kind) {
            Ok(())
        } else {
            Err(Error::SendNotAllowed {
                kind: kind.name(),
                state: self.state,
            })
        }
    }
}
