//! Web of Needs negotiation protocol
//!
//! Message model, reference graph, status derivation and connection
//! lifecycle for the client side of a Web of Needs connection.
//!
//! # Design
//!
//! Messages are an append-only log per connection ([`MessageStore`]). Chat
//! messages may reference earlier messages under six kinds (proposes,
//! claims, accepts, rejects, retracts, proposesToCancel). The
//! [`ReferenceGraph`] inverts those references so that the status of any
//! message ([`MessageStatus`]) can be derived on demand from who points at
//! it. Nothing derived is ever stored.
//!
//! # Bilateral identity
//!
//! Each side of a connection mints its own URI for a shared event. A
//! reference may name either of them, so every lookup matches both the
//! local and the remote URI of a message.
//!
//! # Example
//!
//! ```rust
//! use won_protocol::{Direction, Message, MessageStore, ReferenceKind, References, Uri};
//!
//! let mut store = MessageStore::new();
//! store.insert(Message::chat("a", Direction::Outgoing, References::default()));
//! store.insert(Message::chat(
//!     "b",
//!     Direction::Incoming,
//!     References::default().with(ReferenceKind::Proposes, "a"),
//! ));
//!
//! let status = store.graph().status_of(&Uri::from("a")).unwrap();
//! assert!(status.is_proposed);
//! ```

pub mod actions;
mod builder;
pub mod connection;
pub mod error;
mod graph;
mod message;
mod status;
mod store;
mod uri;

pub use actions::{allowed_actions, classify, ensure_allowed, Action, Classification};
pub use builder::{MessageBuilder, Outbound, OutboundAction};
pub use connection::{ConnectionEvent, ConnectionState, ConnectionStateMachine};
pub use error::{Error, Result};
pub use graph::ReferenceGraph;
pub use message::{
    parse_messages, Delivery, Direction, Message, MessageKind, ReferenceKind, References,
    WireMessage, WireReferences,
};
pub use status::MessageStatus;
pub use store::{Admission, MessageStore};
pub use uri::Uri;
