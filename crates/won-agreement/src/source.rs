//! Where agreement data comes from.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use won_protocol::{Message, Uri};

use crate::error::Result;

/// Response of the owner's agreement-protocol endpoint for one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementProtocolUris {
    #[serde(default)]
    pub agreement_uris: BTreeSet<Uri>,
    #[serde(default)]
    pub pending_proposal_uris: BTreeSet<Uri>,
    #[serde(default)]
    pub pending_proposals: BTreeSet<Uri>,
    #[serde(default)]
    pub accepted_cancellation_proposal_uris: BTreeSet<Uri>,
    #[serde(default)]
    pub cancellation_pending_agreement_uris: BTreeSet<Uri>,
    #[serde(default)]
    pub pending_cancellation_proposal_uris: BTreeSet<Uri>,
    #[serde(default)]
    pub cancelled_agreement_uris: BTreeSet<Uri>,
    #[serde(default)]
    pub rejected_message_uris: BTreeSet<Uri>,
    #[serde(default)]
    pub retracted_message_uris: BTreeSet<Uri>,
}

impl AgreementProtocolUris {
    /// Parse an endpoint response.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| won_protocol::Error::from(e).into())
    }
}

/// Remote collaborator answering agreement queries.
#[async_trait]
pub trait AgreementSource: Send + Sync {
    /// Fetch the server-computed agreement protocol sets of a connection.
    async fn protocol_uris(&self, connection: &Uri) -> Result<AgreementProtocolUris>;

    /// Fetch a single event as seen by `requester_atom`.
    async fn fetch_message(&self, requester_atom: &Uri, uri: &Uri) -> Result<Message>;
}
