//! Outbound message construction.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::actions::Action;
use crate::message::{Direction, Message, MessageKind, References};
use crate::uri::Uri;

const EVENT_ID_LEN: usize = 20;

/// Something the local user wants to send over a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    Connect { text: Option<String> },
    Open { text: Option<String> },
    Close { text: Option<String> },
    Chat { text: String },
    /// A negotiation action referencing an existing message.
    Negotiate { action: Action, referenced: Uri },
}

impl OutboundAction {
    /// The negotiation action, if this is one.
    pub fn action(&self) -> Option<(Action, &Uri)> {
        match self {
            Self::Negotiate { action, referenced } => Some((*action, referenced)),
            _ => None,
        }
    }

    fn text(&self) -> Option<&str> {
        match self {
            Self::Connect { text } | Self::Open { text } | Self::Close { text } => text.as_deref(),
            Self::Chat { text } => Some(text),
            Self::Negotiate { .. } => None,
        }
    }

    fn kind(&self) -> MessageKind {
        match self {
            Self::Connect { .. } => MessageKind::Connect,
            Self::Open { .. } => MessageKind::Open,
            Self::Close { .. } => MessageKind::Close,
            Self::Chat { .. } => MessageKind::Chat {
                references: References::default(),
            },
            Self::Negotiate { action, referenced } => MessageKind::Chat {
                references: References::default().with(action.reference_kind(), referenced.clone()),
            },
        }
    }
}

/// A built message ready to hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub event_uri: Uri,
    /// The optimistic local copy.
    pub message: Message,
    pub text: Option<String>,
}

/// Builds outgoing messages for one connection.
#[derive(Debug, Clone)]
pub struct MessageBuilder {
    node_uri: String,
    sender_socket: Uri,
    target_socket: Uri,
}

impl MessageBuilder {
    pub fn new(node_uri: impl Into<String>, sender_socket: Uri, target_socket: Uri) -> Self {
        let node_uri: String = node_uri.into();
        Self {
            node_uri: node_uri.trim_end_matches('/').to_string(),
            sender_socket,
            target_socket,
        }
    }

    /// Build a message with a freshly minted event URI.
    pub fn build(&self, action: &OutboundAction) -> Outbound {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(EVENT_ID_LEN)
            .map(char::from)
            .collect();
        self.build_with_id(action, &id.to_lowercase())
    }

    /// Build a message with a caller-chosen event id.
    pub fn build_with_id(&self, action: &OutboundAction, id: &str) -> Outbound {
        let event_uri = Uri::new(format!("{}/event/{}", self.node_uri, id));
        let text = action.text().map(str::to_string);

        let mut message = Message::new(event_uri.clone(), action.kind(), Direction::Outgoing);
        // Negotiation messages carry their reference as content.
        message.has_content = text.is_some() || action.action().is_some();
        message.sender_socket = Some(self.sender_socket.clone());
        message.target_socket = Some(self.target_socket.clone());
        message.date = now_millis();

        Outbound {
            event_uri,
            message,
            text,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
