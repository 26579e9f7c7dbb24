//! Which negotiation actions a message currently qualifies for.
//!
//! These predicates decide what the UI may offer. Every action requires a
//! connected connection and a content-bearing message that is neither a
//! connect nor a change notification.

use serde::Serialize;

use crate::connection::ConnectionState;
use crate::error::{Error, Result};
use crate::message::{Message, MessageKind, ReferenceKind};
use crate::status::MessageStatus;

/// A negotiation action referencing an existing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Propose,
    Claim,
    Accept,
    Reject,
    Retract,
    ProposeToCancel,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Propose,
        Action::Claim,
        Action::Accept,
        Action::Reject,
        Action::Retract,
        Action::ProposeToCancel,
    ];

    /// The reference kind the resulting message uses.
    pub const fn reference_kind(self) -> ReferenceKind {
        match self {
            Self::Propose => ReferenceKind::Proposes,
            Self::Claim => ReferenceKind::Claims,
            Self::Accept => ReferenceKind::Accepts,
            Self::Reject => ReferenceKind::Rejects,
            Self::Retract => ReferenceKind::Retracts,
            Self::ProposeToCancel => ReferenceKind::ProposesToCancel,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Propose => "propose",
            Self::Claim => "claim",
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Retract => "retract",
            Self::ProposeToCancel => "proposeToCancel",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a message should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Classification {
    /// An open claim awaiting a response.
    Claim,
    /// An open proposal (or cancellation proposal) awaiting a response.
    Proposal,
    /// An accepted proposal or claim that is in force.
    Agreement,
    /// Anything else.
    Plain,
}

/// Whether the message proposes, claims or proposes to cancel something.
pub fn has_agreement_references(msg: &Message) -> bool {
    let refs = msg.references();
    refs.has(ReferenceKind::Claims)
        || refs.has(ReferenceKind::Proposes)
        || refs.has(ReferenceKind::ProposesToCancel)
}

fn is_negotiable(msg: &Message) -> bool {
    msg.has_content && !matches!(msg.kind, MessageKind::Connect | MessageKind::ChangeNotification)
}

fn is_settled(status: &MessageStatus) -> bool {
    status.is_accepted
        || status.is_agreed
        || status.is_cancelled
        || status.is_cancellation_pending
        || status.is_retracted
        || status.is_rejected
}

/// Whether `action` may be taken on `msg`.
pub fn is_allowed(action: Action, msg: &Message, status: &MessageStatus, state: ConnectionState) -> bool {
    if state != ConnectionState::Connected || !is_negotiable(msg) {
        return false;
    }
    let withdrawn = status.is_retracted || status.is_rejected;
    match action {
        Action::Propose => msg.references().is_empty() && !withdrawn,
        Action::Claim => msg.references().is_empty() && !withdrawn && !msg.is_outgoing(),
        Action::Accept | Action::Reject => {
            has_agreement_references(msg) && !msg.is_outgoing() && !is_settled(status)
        }
        Action::Retract => msg.is_outgoing() && !is_settled(status),
        Action::ProposeToCancel => is_cancelable(msg, status),
    }
}

/// Every action `msg` currently qualifies for.
pub fn allowed_actions(msg: &Message, status: &MessageStatus, state: ConnectionState) -> Vec<Action> {
    Action::ALL
        .into_iter()
        .filter(|a| is_allowed(*a, msg, status, state))
        .collect()
}

/// Fail with [`Error::ActionNotAllowed`] unless `action` is allowed.
pub fn ensure_allowed(
    action: Action,
    msg: &Message,
    status: &MessageStatus,
    state: ConnectionState,
) -> Result<()> {
    if is_allowed(action, msg, status, state) {
        Ok(())
    } else {
        Err(Error::ActionNotAllowed {
            action,
            uri: msg.uri.clone(),
        })
    }
}

/// Whether the message could be agreed on: it carries agreement references
/// and nothing has happened to it yet.
pub fn is_agreeable(msg: &Message, status: &MessageStatus) -> bool {
    msg.has_content && has_agreement_references(msg) && !is_settled(status)
}

/// Whether an accepted message could still be proposed for cancellation.
pub fn is_cancelable(msg: &Message, status: &MessageStatus) -> bool {
    has_agreement_references(msg)
        && status.is_accepted
        && !status.is_cancelled
        && !status.is_cancellation_pending
}

/// An open claim.
pub fn is_claim(msg: &Message, status: &MessageStatus) -> bool {
    !is_settled(status) && msg.references().has(ReferenceKind::Claims)
}

/// An open proposal or cancellation proposal.
pub fn is_proposal(msg: &Message, status: &MessageStatus) -> bool {
    let refs = msg.references();
    !is_settled(status)
        && (refs.has(ReferenceKind::Proposes) || refs.has(ReferenceKind::ProposesToCancel))
}

pub fn is_agreement(status: &MessageStatus) -> bool {
    status.is_agreed
}

/// Display classification. A message that both claims and proposes is shown
/// as a claim; the status flags themselves are unaffected.
pub fn classify(msg: &Message, status: &MessageStatus) -> Classification {
    if is_claim(msg, status) {
        Classification::Claim
    } else if is_proposal(msg, status) {
        Classification::Proposal
    } else if is_agreement(status) {
        Classification::Agreement
    } else {
        Classification::Plain
    }
}
