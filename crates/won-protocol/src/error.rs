//! Error types for won-protocol.

use thiserror::Error;

use crate::actions::Action;
use crate::connection::{ConnectionEvent, ConnectionState};
use crate::uri::Uri;

/// Result type for won-protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while evaluating or driving the negotiation protocol.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The connection lifecycle does not allow the event in its current state.
    #[error("invalid connection transition: {event} is not allowed in state {state}")]
    InvalidTransition {
        state: ConnectionState,
        event: ConnectionEvent,
    },

    /// A negotiation action was attempted on a message that does not qualify.
    #[error("{action} is not allowed on message {uri}")]
    ActionNotAllowed { action: Action, uri: Uri },

    /// An outbound message kind is not legal in the connection's state.
    #[error("cannot send {kind} while connection is {state}")]
    SendNotAllowed {
        kind: &'static str,
        state: ConnectionState,
    },

    /// The referenced message is not present in the store.
    #[error("unknown message: {0}")]
    UnknownMessage(Uri),

    /// A wire record could not be turned into a message.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Wire payload could not be parsed.
    #[error("malformed wire payload: {0}")]
    Malformed(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Malformed(e.to_string())
    }
}
