//! Message model.
//!
//! Messages arrive from the transport as already-parsed [`WireMessage`]
//! records and are admitted into the store as typed [`Message`] values. The
//! kind is a closed set: only connection messages (chat) carry negotiation
//! references, every other kind has a fixed, reference-free shape.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::uri::Uri;

/// The six ways one message may point at another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceKind {
    Proposes,
    Claims,
    Accepts,
    Rejects,
    Retracts,
    ProposesToCancel,
}

impl ReferenceKind {
    /// All reference kinds, in wire order.
    pub const ALL: [ReferenceKind; 6] = [
        ReferenceKind::Proposes,
        ReferenceKind::Claims,
        ReferenceKind::Accepts,
        ReferenceKind::Rejects,
        ReferenceKind::Retracts,
        ReferenceKind::ProposesToCancel,
    ];

    /// Wire name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Proposes => "proposes",
            Self::Claims => "claims",
            Self::Accepts => "accepts",
            Self::Rejects => "rejects",
            Self::Retracts => "retracts",
            Self::ProposesToCancel => "proposesToCancel",
        }
    }
}

impl std::fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outgoing references of a single message, grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct References {
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub proposes: BTreeSet<Uri>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub claims: BTreeSet<Uri>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub accepts: BTreeSet<Uri>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub rejects: BTreeSet<Uri>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub retracts: BTreeSet<Uri>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub proposes_to_cancel: BTreeSet<Uri>,
}

static NO_REFERENCES: References = References::EMPTY;

impl References {
    /// A reference set with nothing in it.
    pub const EMPTY: References = References {
        proposes: BTreeSet::new(),
        claims: BTreeSet::new(),
        accepts: BTreeSet::new(),
        rejects: BTreeSet::new(),
        retracts: BTreeSet::new(),
        proposes_to_cancel: BTreeSet::new(),
    };

    /// References of one kind.
    pub fn get(&self, kind: ReferenceKind) -> &BTreeSet<Uri> {
        match kind {
            ReferenceKind::Proposes => &self.proposes,
            ReferenceKind::Claims => &self.claims,
            ReferenceKind::Accepts => &self.accepts,
            ReferenceKind::Rejects => &self.rejects,
            ReferenceKind::Retracts => &self.retracts,
            ReferenceKind::ProposesToCancel => &self.proposes_to_cancel,
        }
    }

    fn get_mut(&mut self, kind: ReferenceKind) -> &mut BTreeSet<Uri> {
        match kind {
            ReferenceKind::Proposes => &mut self.proposes,
            ReferenceKind::Claims => &mut self.claims,
            ReferenceKind::Accepts => &mut self.accepts,
            ReferenceKind::Rejects => &mut self.rejects,
            ReferenceKind::Retracts => &mut self.retracts,
            ReferenceKind::ProposesToCancel => &mut self.proposes_to_cancel,
        }
    }

    /// Add a reference. Blank URIs are dropped.
    pub fn insert(&mut self, kind: ReferenceKind, target: Uri) {
        if !target.is_empty() {
            self.get_mut(kind).insert(target);
        }
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, kind: ReferenceKind, target: impl Into<Uri>) -> Self {
        self.insert(kind, target.into());
        self
    }

    /// Whether there is at least one reference of this kind.
    pub fn has(&self, kind: ReferenceKind) -> bool {
        !self.get(kind).is_empty()
    }

    /// Whether no references of any kind exist.
    pub fn is_empty(&self) -> bool {
        ReferenceKind::ALL.iter().all(|k| !self.has(*k))
    }

    /// Iterate over `(kind, target)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (ReferenceKind, &Uri)> {
        ReferenceKind::ALL
            .into_iter()
            .flat_map(move |k| self.get(k).iter().map(move |u| (k, u)))
    }
}

/// Which side of the connection authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub const fn from_outgoing(outgoing: bool) -> Self {
        if outgoing {
            Self::Outgoing
        } else {
            Self::Incoming
        }
    }

    pub const fn is_outgoing(self) -> bool {
        matches!(self, Self::Outgoing)
    }
}

/// Message kind, tagged by the wire `messageType`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    /// Connection request (also used to reopen a closed connection).
    Connect,
    /// Acceptance of a connection request.
    Open,
    /// Chat message; the only kind that carries negotiation references.
    Chat { references: References },
    Close,
    Feedback,
    AtomHint,
    SocketHint,
    ChangeNotification,
    /// Node response to a previously sent message.
    Response { success: bool },
}

impl MessageKind {
    /// Parse a wire `messageType`. Both full vocabulary URIs and prefixed or
    /// bare local names are accepted; only the local name is significant.
    pub fn from_wire(message_type: &str, references: References) -> Result<Self> {
        let local = message_type
            .rsplit(|c: char| c == '#' || c == ':' || c == '/')
            .next()
            .unwrap_or(message_type);
        let kind = match local {
            "ConnectMessage" => Self::Connect,
            "OpenMessage" => Self::Open,
            "ConnectionMessage" => Self::Chat { references },
            "CloseMessage" => Self::Close,
            "FeedbackMessage" => Self::Feedback,
            "AtomHintMessage" | "HintMessage" => Self::AtomHint,
            "SocketHintMessage" => Self::SocketHint,
            "ChangeNotificationMessage" => Self::ChangeNotification,
            "SuccessResponse" => Self::Response { success: true },
            "FailureResponse" => Self::Response { success: false },
            other => {
                return Err(Error::InvalidMessage(format!(
                    "unsupported message type {other:?}"
                )))
            }
        };
        Ok(kind)
    }

    /// Short name for logging and error messages.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Open => "open",
            Self::Chat { .. } => "chat",
            Self::Close => "close",
            Self::Feedback => "feedback",
            Self::AtomHint => "atomHint",
            Self::SocketHint => "socketHint",
            Self::ChangeNotification => "changeNotification",
            Self::Response { .. } => "response",
        }
    }
}

/// Delivery annotations on a message. These are the only mutable parts of a
/// stored message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub is_received_by_own: bool,
    pub is_received_by_remote: bool,
    pub failed_to_send: bool,
}

/// A protocol event exchanged over a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Local identity of the event.
    pub uri: Uri,
    /// Counterpart's identity for the same logical event.
    pub remote_uri: Option<Uri>,
    pub kind: MessageKind,
    pub direction: Direction,
    pub has_content: bool,
    pub system_message: bool,
    pub sender_socket: Option<Uri>,
    pub target_socket: Option<Uri>,
    /// Milliseconds since the Unix epoch.
    pub date: u64,
    pub unread: bool,
    pub delivery: Delivery,
}

impl Message {
    /// A bare message of the given kind, for builders and tests.
    pub fn new(uri: impl Into<Uri>, kind: MessageKind, direction: Direction) -> Self {
        Self {
            uri: uri.into(),
            remote_uri: None,
            kind,
            direction,
            has_content: false,
            system_message: false,
            sender_socket: None,
            target_socket: None,
            date: 0,
            unread: false,
            delivery: Delivery::default(),
        }
    }

    /// Convenience constructor for a chat message.
    pub fn chat(uri: impl Into<Uri>, direction: Direction, references: References) -> Self {
        let mut msg = Self::new(uri, MessageKind::Chat { references }, direction);
        msg.has_content = true;
        msg
    }

    #[must_use]
    pub fn with_remote_uri(mut self, remote: impl Into<Uri>) -> Self {
        self.remote_uri = Some(remote.into());
        self
    }

    #[must_use]
    pub fn with_date(mut self, date: u64) -> Self {
        self.date = date;
        self
    }

    #[must_use]
    pub fn with_content(mut self, has_content: bool) -> Self {
        self.has_content = has_content;
        self
    }

    #[must_use]
    pub fn with_sockets(mut self, sender: impl Into<Uri>, target: impl Into<Uri>) -> Self {
        self.sender_socket = Some(sender.into());
        self.target_socket = Some(target.into());
        self
    }

    /// Negotiation references; empty for every kind but chat.
    pub fn references(&self) -> &References {
        match &self.kind {
            MessageKind::Chat { references } => references,
            _ => &NO_REFERENCES,
        }
    }

    pub fn is_outgoing(&self) -> bool {
        self.direction.is_outgoing()
    }

    /// Whether `uri` names this message from either side of the connection.
    pub fn is_known_as(&self, uri: &Uri) -> bool {
        &self.uri == uri || self.remote_uri.as_ref() == Some(uri)
    }

    /// Whether the message carries references that can change the status of
    /// other messages, in which case agreement data should be refreshed.
    pub fn needs_effects_fetch(&self) -> bool {
        !self.references().is_empty()
    }

    /// Atom of the sending socket.
    pub fn sender_atom(&self) -> Option<Uri> {
        self.sender_socket.as_ref().and_then(Uri::socket_atom)
    }

    /// Atom of the target socket.
    pub fn target_atom(&self) -> Option<Uri> {
        self.target_socket.as_ref().and_then(Uri::socket_atom)
    }
}

/// Reference lists as they appear on the wire.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireReferences {
    #[serde(default)]
    pub proposes: Option<Vec<String>>,
    #[serde(default)]
    pub claims: Option<Vec<String>>,
    #[serde(default)]
    pub accepts: Option<Vec<String>>,
    #[serde(default)]
    pub rejects: Option<Vec<String>>,
    #[serde(default)]
    pub retracts: Option<Vec<String>>,
    #[serde(default)]
    pub proposes_to_cancel: Option<Vec<String>>,
}

impl WireReferences {
    fn into_references(self) -> References {
        let mut refs = References::default();
        let lists = [
            (ReferenceKind::Proposes, self.proposes),
            (ReferenceKind::Claims, self.claims),
            (ReferenceKind::Accepts, self.accepts),
            (ReferenceKind::Rejects, self.rejects),
            (ReferenceKind::Retracts, self.retracts),
            (ReferenceKind::ProposesToCancel, self.proposes_to_cancel),
        ];
        for (kind, list) in lists {
            for target in list.into_iter().flatten() {
                refs.insert(kind, Uri::new(target));
            }
        }
        refs
    }
}

/// A message record as produced by the parsing collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    pub uri: String,
    #[serde(default)]
    pub remote_uri: Option<String>,
    pub message_type: String,
    #[serde(default)]
    pub outgoing_message: bool,
    #[serde(default)]
    pub system_message: bool,
    #[serde(default)]
    pub has_content: bool,
    #[serde(default)]
    pub has_references: bool,
    #[serde(default)]
    pub references: WireReferences,
    #[serde(default)]
    pub sender_socket_uri: Option<String>,
    #[serde(default)]
    pub target_socket_uri: Option<String>,
    #[serde(default)]
    pub date: u64,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub is_received_by_own: bool,
    #[serde(default)]
    pub is_received_by_remote: bool,
    #[serde(default)]
    pub failed_to_send: bool,
}

impl TryFrom<WireMessage> for Message {
    type Error = Error;

    fn try_from(wire: WireMessage) -> Result<Self> {
        let uri = Uri::new(wire.uri);
        if uri.is_empty() {
            return Err(Error::InvalidMessage("message without uri".into()));
        }

        let references = wire.references.into_references();
        if wire.has_references && references.is_empty() {
            tracing::debug!(uri = %uri, "hasReferences set but no references present");
        }
        let kind = MessageKind::from_wire(&wire.message_type, references.clone())?;
        if !matches!(kind, MessageKind::Chat { .. }) && !references.is_empty() {
            tracing::debug!(uri = %uri, kind = kind.name(), "dropping references on non-chat message");
        }

        let non_blank = |s: Option<String>| s.map(Uri::new).filter(|u| !u.is_empty());

        Ok(Self {
            uri,
            remote_uri: non_blank(wire.remote_uri),
            kind,
            direction: Direction::from_outgoing(wire.outgoing_message),
            has_content: wire.has_content,
            system_message: wire.system_message,
            sender_socket: non_blank(wire.sender_socket_uri),
            target_socket: non_blank(wire.target_socket_uri),
            date: wire.date,
            unread: wire.unread,
            delivery: Delivery {
                is_received_by_own: wire.is_received_by_own,
                is_received_by_remote: wire.is_received_by_remote,
                failed_to_send: wire.failed_to_send,
            },
        })
    }
}

/// Parse a JSON array of wire messages.
///
/// Records that do not describe a usable message (unknown type, blank uri)
/// are logged and skipped. Only malformed JSON fails the page.
pub fn parse_messages(json: &str) -> Result<Vec<Message>> {
    let wire: Vec<WireMessage> = serde_json::from_str(json)?;
    let mut messages = Vec::with_capacity(wire.len());
    for record in wire {
        match Message::try_from(record) {
            Ok(msg) => messages.push(msg),
            Err(err) => tracing::warn!(error = %err, "skipping message"),
        }
    }
    Ok(messages)
}
