//! Per-resource load records.

use std::collections::HashMap;

use serde::Serialize;
use won_protocol::Uri;

/// HTTP status the node answers with for deleted resources.
pub const GONE: u16 = 410;

/// Where a resource is in its current fetch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LoadPhase {
    /// Known to exist, nobody asked for it.
    #[default]
    Unrequested,
    /// Should be fetched when convenient.
    ToLoad,
    /// A fetch is in flight.
    Loading,
    Loaded,
    FailedToLoad,
}

impl std::fmt::Display for LoadPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unrequested => write!(f, "unrequested"),
            Self::ToLoad => write!(f, "toLoad"),
            Self::Loading => write!(f, "loading"),
            Self::Loaded => write!(f, "loaded"),
            Self::FailedToLoad => write!(f, "failedToLoad"),
        }
    }
}

/// Status reported by the node for the last fetch, kept for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusInfo {
    pub code: Option<u16>,
    pub message: String,
}

impl StatusInfo {
    pub fn new(code: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Whether the resource was deleted on the node.
    pub fn is_gone(&self) -> bool {
        self.code == Some(GONE)
    }
}

/// Load record of one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessEntry {
    pub phase: LoadPhase,
    pub status: Option<StatusInfo>,
}

impl ProcessEntry {
    pub fn is_to_load(&self) -> bool {
        self.phase == LoadPhase::ToLoad
    }

    pub fn is_loading(&self) -> bool {
        self.phase == LoadPhase::Loading
    }

    pub fn is_loaded(&self) -> bool {
        self.phase == LoadPhase::Loaded
    }

    pub fn is_failed(&self) -> bool {
        self.phase == LoadPhase::FailedToLoad
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtomProcess {
    #[serde(flatten)]
    pub entry: ProcessEntry,
    /// An edit of the atom is being submitted.
    pub processing_update: bool,
}

/// Named data sets fetched separately for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SubResource {
    PetriNetData,
    AgreementData,
    AgreementDataset,
}

impl std::fmt::Display for SubResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PetriNetData => write!(f, "petriNetData"),
            Self::AgreementData => write!(f, "agreementData"),
            Self::AgreementDataset => write!(f, "agreementDataset"),
        }
    }
}

/// Load record of a connection sub-resource.
///
/// `fail_count` only grows on failure and drops back to zero on success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubResourceProcess {
    pub loading: bool,
    pub loaded: bool,
    pub fail_count: u32,
    /// Only meaningful for petri net data: the loaded copy is outdated.
    pub dirty: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionProcess {
    #[serde(flatten)]
    pub entry: ProcessEntry,
    /// Atom owning the connection, once its container was loaded.
    pub atom: Option<Uri>,
    pub loading_messages: bool,
    /// Cursor for the next page of older messages.
    pub next_page: Option<String>,
    pub petri_net_data: SubResourceProcess,
    pub agreement_data: SubResourceProcess,
    pub agreement_dataset: SubResourceProcess,
    /// Messages whose last fetch failed.
    pub failed_messages: HashMap<Uri, StatusInfo>,
}

impl ConnectionProcess {
    pub fn sub_resource(&self, sub: SubResource) -> &SubResourceProcess {
        match sub {
            SubResource::PetriNetData => &self.petri_net_data,
            SubResource::AgreementData => &self.agreement_data,
            SubResource::AgreementDataset => &self.agreement_dataset,
        }
    }

    pub(crate) fn sub_resource_mut(&mut self, sub: SubResource) -> &mut SubResourceProcess {
        match sub {
            SubResource::PetriNetData => &mut self.petri_net_data,
            SubResource::AgreementData => &mut self.agreement_data,
            SubResource::AgreementDataset => &mut self.agreement_dataset,
        }
    }

    /// Whether the last fetch of `message` failed.
    pub fn message_failed(&self, message: &Uri) -> bool {
        self.failed_messages.contains_key(message)
    }
}
